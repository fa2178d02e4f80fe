use sg_xfer::recovery::{
    classify::Category,
    policy::{Attempt, BadBlockAction, Decision, RetryPolicy, Side},
};

fn attempt(side: Side, start: u64, blocks: u32) -> Attempt {
    Attempt {
        side,
        start,
        blocks,
        media_retry_used: false,
        medium_retries: 0,
        command_device: true,
        max_transfer: None,
    }
}

#[test]
fn test_unit_attention_budget() {
    let policy = RetryPolicy::default();
    let mut st = policy.initial_state();
    let a = attempt(Side::Read, 0, 8);
    for _ in 0..10 {
        assert_eq!(
            policy.decide(&mut st, Category::UnitAttention, &a),
            Decision::Reissue
        );
    }
    assert_eq!(st.unit_attention_left(), 0);
    assert_eq!(
        policy.decide(&mut st, Category::UnitAttention, &a),
        Decision::Fatal {
            category: Category::UnitAttention
        }
    );
}

#[test]
fn test_aborted_budget() {
    let policy = RetryPolicy::default();
    let mut st = policy.initial_state();
    let a = attempt(Side::Write, 0, 8);
    for _ in 0..256 {
        assert_eq!(
            policy.decide(&mut st, Category::AbortedCommand, &a),
            Decision::Reissue
        );
    }
    assert!(matches!(
        policy.decide(&mut st, Category::AbortedCommand, &a),
        Decision::Fatal { .. }
    ));
}

#[test]
fn test_media_change_retried_once() {
    let policy = RetryPolicy::default();
    let mut st = policy.initial_state();
    let mut a = attempt(Side::Read, 0, 8);
    assert_eq!(
        policy.decide(&mut st, Category::MediaChanged, &a),
        Decision::Reissue
    );
    a.media_retry_used = true;
    assert!(matches!(
        policy.decide(&mut st, Category::MediaChanged, &a),
        Decision::Fatal { .. }
    ));
}

#[test]
fn test_out_of_resources_shrinks() {
    let policy = RetryPolicy::default();
    let mut st = policy.initial_state();
    let mut a = attempt(Side::Read, 0, 4);
    assert_eq!(
        policy.decide(&mut st, Category::SubmissionOutOfResources, &a),
        Decision::Shrink { blocks: 2 }
    );
    a.max_transfer = Some(3);
    assert_eq!(
        policy.decide(&mut st, Category::SubmissionOutOfResources, &a),
        Decision::Shrink { blocks: 3 }
    );
    let one = attempt(Side::Read, 0, 1);
    assert!(matches!(
        policy.decide(&mut st, Category::SubmissionOutOfResources, &one),
        Decision::Fatal { .. }
    ));
}

#[test]
fn test_split_at_reported_position() {
    let policy = RetryPolicy::default().with_coe(1, true, true);
    let mut st = policy.initial_state();
    let a = attempt(Side::Read, 100, 16);
    assert_eq!(
        policy.decide(
            &mut st,
            Category::MediumErrorWithPosition { lba: 105 },
            &a
        ),
        Decision::Split {
            good: 5,
            bad_lba: 105,
            action: BadBlockAction::Substitute,
        }
    );
}

#[test]
fn test_coe_levels_pick_bad_block_action() {
    let cat = Category::MediumErrorWithPosition { lba: 0 };
    let a = attempt(Side::Read, 0, 1);
    let action = |level: u8, a: &Attempt| {
        let policy = RetryPolicy::default().with_coe(level, true, true);
        let mut st = policy.initial_state();
        match policy.decide(&mut st, cat, a) {
            Decision::Split { action, .. } => action,
            other => panic!("unexpected {other:?}"),
        }
    };
    assert_eq!(action(0, &a), BadBlockAction::Stop);
    assert_eq!(action(1, &a), BadBlockAction::Substitute);
    assert_eq!(
        action(2, &a),
        BadBlockAction::DegradedRead { correct: false }
    );
    assert_eq!(action(3, &a), BadBlockAction::DegradedRead { correct: true });

    let file = Attempt {
        command_device: false,
        ..a
    };
    assert_eq!(action(3, &file), BadBlockAction::Substitute);

    let write = attempt(Side::Write, 0, 1);
    assert_eq!(action(0, &write), BadBlockAction::Stop);
    assert_eq!(action(2, &write), BadBlockAction::Skip);
}

#[test]
fn test_coe_mask_by_direction() {
    let policy = RetryPolicy::default().with_coe(2, false, true);
    assert_eq!(policy.coe(Side::Read), 0);
    assert_eq!(policy.coe(Side::Write), 2);
    assert_eq!(policy.coe(Side::Verify), 2);
    assert_eq!(RetryPolicy::default().with_coe(9, true, true).coe_read, 3);
}

#[test]
fn test_medium_retries_before_coe() {
    let policy = RetryPolicy {
        retries: 2,
        ..RetryPolicy::default()
    };
    let mut st = policy.initial_state();
    let mut a = attempt(Side::Read, 0, 8);
    let cat = Category::MediumErrorNoPosition;
    assert_eq!(policy.decide(&mut st, cat, &a), Decision::Reissue);
    a.medium_retries = 2;
    assert!(matches!(
        policy.decide(&mut st, cat, &a),
        Decision::Fatal { .. }
    ));

    let coe = policy.with_coe(1, true, true);
    assert_eq!(coe.decide(&mut st, cat, &a), Decision::Substitute);
}

#[test]
fn test_miscompare_only_tolerated_when_verifying_with_coe() {
    let policy = RetryPolicy::default().with_coe(1, true, true);
    let mut st = policy.initial_state();
    let v = attempt(Side::Verify, 10, 8);
    assert_eq!(
        policy.decide(&mut st, Category::Miscompare { lba: Some(13) }, &v),
        Decision::BypassMismatch { good: 3 }
    );
    assert_eq!(
        policy.decide(&mut st, Category::Miscompare { lba: None }, &v),
        Decision::BypassMismatch { good: 0 }
    );

    let strict = RetryPolicy::default();
    assert!(matches!(
        strict.decide(&mut st, Category::Miscompare { lba: Some(13) }, &v),
        Decision::Fatal { .. }
    ));
}

#[test]
fn test_not_ready_and_other_are_fatal() {
    let policy = RetryPolicy::default().with_coe(3, true, true);
    let mut st = policy.initial_state();
    let a = attempt(Side::Read, 0, 8);
    for cat in [Category::NotReady, Category::Other, Category::TimedOut] {
        assert_eq!(
            policy.decide(&mut st, cat, &a),
            Decision::Fatal { category: cat }
        );
    }
}

#[test]
fn test_consecutive_bad_limit() {
    let policy = RetryPolicy {
        max_consecutive_bad: 2,
        ..RetryPolicy::default()
    };
    let mut st = policy.initial_state();
    assert!(policy.note_bad_block(&mut st, Side::Read));
    assert!(policy.note_bad_block(&mut st, Side::Read));
    assert!(!policy.note_bad_block(&mut st, Side::Read));
    policy.note_good_block(&mut st, Side::Read);
    assert_eq!(st.consecutive_bad(Side::Read), 0);
    assert!(policy.note_bad_block(&mut st, Side::Read));

    let unlimited = RetryPolicy {
        max_consecutive_bad: 0,
        ..RetryPolicy::default()
    };
    let mut st = unlimited.initial_state();
    for _ in 0..1000 {
        assert!(unlimited.note_bad_block(&mut st, Side::Write));
    }
}

#[test]
fn test_bad_runs_are_kept_per_side() {
    let policy = RetryPolicy {
        max_consecutive_bad: 1,
        ..RetryPolicy::default()
    };
    let mut st = policy.initial_state();
    assert!(policy.note_bad_block(&mut st, Side::Read));
    // a bad write does not extend the read run, and vice versa
    assert!(policy.note_bad_block(&mut st, Side::Write));
    assert_eq!(st.consecutive_bad(Side::Read), 1);
    assert_eq!(st.consecutive_bad(Side::Write), 1);

    // a good read leaves the write run alone
    policy.note_good_block(&mut st, Side::Read);
    assert_eq!(st.consecutive_bad(Side::Write), 1);
    assert!(!policy.note_bad_block(&mut st, Side::Verify));

    policy.note_good_block(&mut st, Side::Write);
    assert_eq!(st.consecutive_bad(Side::Verify), 0);
    assert!(policy.note_bad_block(&mut st, Side::Write));
}
