use sg_xfer::{
    control_block::descriptor::{AddressingWidth, CdbFlags, CommandDescriptor, Opcode},
    models::{
        sense_data::{SenseData, key},
        status::HostStatus,
    },
    recovery::classify::{Category, classify},
    transport::{Command, CompletionRecord},
};

fn read(start: u64, blocks: u32) -> Command {
    Command::Transfer(
        CommandDescriptor::build(
            Opcode::Read,
            AddressingWidth::W10,
            start,
            blocks,
            CdbFlags::empty(),
            1,
        )
        .expect("valid read"),
    )
}

fn sense(k: u8, asc: u8, info: Option<u32>) -> CompletionRecord {
    CompletionRecord::check_condition(1, SenseData::fixed(k, asc, 0, info).to_vec(), 0)
}

#[test]
fn test_good_and_recovered() {
    let cmd = read(0, 8);
    assert_eq!(classify(&CompletionRecord::good(1), &cmd), Category::Clean);
    assert_eq!(
        classify(&sense(key::RECOVERED_ERROR, 0x18, None), &cmd),
        Category::Recovered
    );
    assert_eq!(
        classify(&sense(key::NO_SENSE, 0, None), &cmd),
        Category::Clean
    );
}

#[test]
fn test_unit_attention_kinds() {
    let cmd = read(0, 8);
    assert_eq!(
        classify(&sense(key::UNIT_ATTENTION, 0x28, None), &cmd),
        Category::MediaChanged
    );
    assert_eq!(
        classify(&sense(key::UNIT_ATTENTION, 0x29, None), &cmd),
        Category::UnitAttention
    );
    assert_eq!(
        classify(&sense(key::ABORTED_COMMAND, 0, None), &cmd),
        Category::AbortedCommand
    );
    assert_eq!(
        classify(&sense(key::NOT_READY, 0x04, None), &cmd),
        Category::NotReady
    );
}

#[test]
fn test_medium_error_position_must_lie_in_range() {
    let cmd = read(100, 8);
    assert_eq!(
        classify(&sense(key::MEDIUM_ERROR, 0x11, Some(103)), &cmd),
        Category::MediumErrorWithPosition { lba: 103 }
    );
    assert_eq!(
        classify(&sense(key::MEDIUM_ERROR, 0x11, Some(108)), &cmd),
        Category::MediumErrorNoPosition
    );
    assert_eq!(
        classify(&sense(key::HARDWARE_ERROR, 0x44, None), &cmd),
        Category::MediumErrorNoPosition
    );
    let desc = CompletionRecord::check_condition(
        1,
        SenseData::descriptor(key::MEDIUM_ERROR, 0x11, 0, Some(100)),
        0,
    );
    assert_eq!(
        classify(&desc, &cmd),
        Category::MediumErrorWithPosition { lba: 100 }
    );
}

#[test]
fn test_host_failures() {
    let cmd = read(0, 8);
    assert_eq!(
        classify(
            &CompletionRecord::host_failure(1, HostStatus::OutOfResources, 0),
            &cmd
        ),
        Category::SubmissionOutOfResources
    );
    assert_eq!(
        classify(&CompletionRecord::host_failure(1, HostStatus::TimedOut, 0), &cmd),
        Category::TimedOut
    );
    assert_eq!(
        classify(
            &CompletionRecord::host_failure(1, HostStatus::Error("EIO".into()), 0),
            &cmd
        ),
        Category::Other
    );
}

#[test]
fn test_unparseable_and_unknown() {
    let cmd = read(0, 8);
    let junk = CompletionRecord::check_condition(1, vec![0x01, 0x02], 0);
    assert_eq!(classify(&junk, &cmd), Category::Other);
    assert_eq!(
        classify(&sense(key::ILLEGAL_REQUEST, 0x24, None), &cmd),
        Category::Other
    );
    assert_eq!(
        classify(&sense(key::MISCOMPARE, 0x1D, None), &cmd),
        Category::Miscompare { lba: None }
    );
}

#[test]
fn test_capacity_commands_have_no_position() {
    let rec = sense(key::MEDIUM_ERROR, 0x11, Some(0));
    assert_eq!(
        classify(&rec, &Command::ReadCapacity10),
        Category::MediumErrorNoPosition
    );
}
