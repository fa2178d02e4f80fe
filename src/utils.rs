// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// True when every byte of `data` is zero.
pub fn is_all_zero(data: &[u8]) -> bool {
    data.iter().all(|&b| b == 0)
}

/// Number of leading whole blocks of `data` that are all zero.
///
/// A trailing partial block is never counted.
pub fn leading_zero_blocks(data: &[u8], block_size: usize) -> usize {
    data.chunks_exact(block_size.max(1))
        .take_while(|b| is_all_zero(b))
        .count()
}

/// Number of leading blocks (a trailing partial one included) holding
/// data, stopping at the first all-zero whole block or after `limit`.
pub fn leading_data_blocks(data: &[u8], block_size: usize, limit: usize) -> usize {
    let bs = block_size.max(1);
    data.chunks(bs)
        .take(limit)
        .take_while(|b| b.len() < bs || !is_all_zero(b))
        .count()
}
