use sg_xfer::scheduler::{
    Action, Scheduler,
    slot::{Phase, SlotState},
};

/// Walk the read side: claim and submit every read the scheduler offers.
fn issue_reads(s: &mut Scheduler) -> Vec<(usize, u64, u32)> {
    let mut out = Vec::new();
    while let Action::IssueRead { slot, start, blocks } = s.next_action() {
        s.begin_read(slot, start, blocks);
        s.mark_submitted(slot, Phase::Read);
        out.push((slot, start, blocks));
    }
    out
}

fn complete_read(s: &mut Scheduler, slot: usize) {
    let sl = s.slot_mut(slot);
    sl.state = SlotState::Completed;
}

#[test]
fn test_reads_stay_below_half_the_window() {
    let mut s = Scheduler::new(4, 8, Some(100), false);
    let reads = issue_reads(&mut s);
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[0].1, 0);
    assert_eq!(reads[1].1, 8);
    assert_eq!(s.in_flight(Phase::Read), 2);
    assert_eq!(s.next_action(), Action::Wait);

    let mut one = Scheduler::new(1, 8, Some(100), false);
    let reads = issue_reads(&mut one);
    assert_eq!(reads.len(), 1, "a single slot still gets its read");
}

#[test]
fn test_write_budget_and_order_of_writes() {
    let mut s = Scheduler::new(4, 8, Some(32), false);
    assert_eq!(s.write_budget(), 2);
    let reads = issue_reads(&mut s);
    assert_eq!(reads, vec![(0, 0, 8), (1, 8, 8)]);
    complete_read(&mut s, 1);
    complete_read(&mut s, 0);

    // two ready slots fill the write budget, so a write goes first
    assert_eq!(s.next_action(), Action::IssueWrite(0));
    s.mark_submitted(0, Phase::Write);

    assert_eq!(s.next_action(), Action::IssueRead {
        slot: 2,
        start: 16,
        blocks: 8
    });
    s.begin_read(2, 16, 8);
    s.mark_submitted(2, Phase::Read);
    assert_eq!(s.next_action(), Action::IssueRead {
        slot: 3,
        start: 24,
        blocks: 8
    });
    s.begin_read(3, 24, 8);
    s.mark_submitted(3, Phase::Read);

    assert_eq!(s.next_action(), Action::IssueWrite(1));
    s.mark_submitted(1, Phase::Write);
    assert_eq!(s.in_flight(Phase::Write), 2);
    assert_eq!(s.next_action(), Action::Wait);
}

#[test]
fn test_ordered_destination_one_write_at_a_time() {
    let mut s = Scheduler::new(4, 4, Some(8), true);
    let reads = issue_reads(&mut s);
    assert_eq!(reads.len(), 2);
    // second range completes first
    complete_read(&mut s, reads[1].0);
    assert_eq!(s.next_action(), Action::Wait);
    complete_read(&mut s, reads[0].0);
    assert_eq!(s.next_action(), Action::IssueWrite(reads[0].0));
    s.mark_submitted(reads[0].0, Phase::Write);
    assert_eq!(s.next_action(), Action::Wait);
    s.advance_write(reads[0].0, 4);
    assert_eq!(s.next_action(), Action::IssueWrite(reads[1].0));
}

#[test]
fn test_partial_write_keeps_slot() {
    let mut s = Scheduler::new(2, 4, Some(4), false);
    let (slot, start, blocks) = match s.next_action() {
        Action::IssueRead { slot, start, blocks } => (slot, start, blocks),
        other => panic!("unexpected {other:?}"),
    };
    s.begin_read(slot, start, blocks);
    complete_read(&mut s, slot);
    s.advance_write(slot, 1);
    assert_eq!(s.slot(slot).state, SlotState::Completed);
    assert_eq!(s.slot(slot).write_cursor(), 1);
    s.advance_write(slot, 3);
    assert!(s.slot(slot).is_free());
    assert_eq!(s.next_action(), Action::Done);
}

#[test]
fn test_shrink_requeues_tail() {
    let mut s = Scheduler::new(4, 8, Some(8), false);
    let reads = issue_reads(&mut s);
    assert_eq!(reads, vec![(0, 0, 8)]);
    s.slot_mut(0).state = SlotState::WaitingRetry;
    s.shrink_read(0, 2);
    s.set_read_chunk(2);
    assert_eq!(s.slot(0).blocks, 2);
    assert_eq!(s.next_action(), Action::Retry(0));
    s.mark_submitted(0, Phase::Read);
    assert_eq!(s.next_action(), Action::IssueRead {
        slot: 1,
        start: 2,
        blocks: 2
    });
}

#[test]
fn test_truncate_end_limits_reads() {
    let mut s = Scheduler::new(8, 4, None, false);
    let reads = issue_reads(&mut s);
    assert_eq!(reads.len(), 4);
    s.truncate_end(6);
    assert_eq!(s.end(), Some(6));
    assert_eq!(s.clamp(4, 4), 2);
    assert_eq!(s.clamp(8, 4), 0);
    for (slot, _, _) in reads {
        s.slot_mut(slot).state = SlotState::Free;
    }
    assert_eq!(s.next_action(), Action::Done);
}

#[test]
fn test_stop_reads_then_stop_all() {
    let mut s = Scheduler::new(4, 4, Some(100), false);
    let reads = issue_reads(&mut s);
    complete_read(&mut s, reads[0].0);
    s.stop_reads();
    assert!(s.is_stopping());
    assert_eq!(s.next_action(), Action::IssueWrite(reads[0].0));
    s.stop_all();
    assert!(s.slot(reads[0].0).is_free());
    assert_eq!(s.next_action(), Action::Wait, "second read still in flight");
    s.slot_mut(reads[1].0).state = SlotState::WaitingRetry;
    assert_eq!(s.next_action(), Action::Done, "stopped retries are not handed out");
}

#[test]
fn test_failed_slot_leaves_the_window_until_released() {
    let mut s = Scheduler::new(4, 8, Some(32), false);
    let reads = issue_reads(&mut s);
    assert_eq!(reads, vec![(0, 0, 8), (1, 8, 8)]);

    s.mark_failed(0);
    assert_eq!(s.slot(0).state, SlotState::Failed);
    assert_eq!(s.in_flight(Phase::Read), 1);
    assert_eq!(s.undrained(), 0);
    // the failed slot is neither reused for reading nor written
    assert_eq!(s.next_action(), Action::IssueRead {
        slot: 2,
        start: 16,
        blocks: 8
    });

    s.stop_all();
    assert_eq!(s.slot(0).state, SlotState::Free);
    assert_eq!(s.slot(1).state, SlotState::Submitted);
    assert_eq!(s.next_action(), Action::Wait);

    s.mark_failed(1);
    s.release(1);
    assert_eq!(s.next_action(), Action::Done);
}
