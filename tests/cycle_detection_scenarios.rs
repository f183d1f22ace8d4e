use chrono::{DateTime, Duration, TimeZone, Utc};
use cycle_analysis::config::AnalysisConfig;
use cycle_analysis::engine::Engine;
use cycle_analysis::error::Severity;
use cycle_analysis::models::{
    Machine, MachineId, Operation, OperationId, SlotContext, TimeRange,
};

const MACHINE: MachineId = MachineId(1);

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2012, 6, d, 0, 0, 0).unwrap()
}

fn engine() -> Engine {
    let mut engine = Engine::new(AnalysisConfig::default());
    engine.register_machine(Machine::new(MACHINE, "mill-1"));
    engine
}

fn engine_with_operation(operation: Operation) -> Engine {
    let mut engine = engine();
    engine.register_operation(operation);
    engine
}

fn error_count(engine: &Engine) -> usize {
    engine
        .detection_log(MACHINE)
        .unwrap()
        .iter()
        .filter(|e| e.severity == Severity::Error)
        .count()
}

#[test]
fn test_start_without_covering_slot_leaves_cycle_unattached() {
    let engine = engine();
    let created = engine.start_cycle(MACHINE, day(19)).unwrap();
    assert!(created.is_some());

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].begin, Some(day(19)));
    assert!(!cycles[0].status.begin_estimated);
    assert_eq!(cycles[0].end, None);
    assert_eq!(cycles[0].slot, None);
    assert!(engine.between_cycles(MACHINE).unwrap().is_empty());
}

#[test]
fn test_stop_stop_sequence_builds_two_full_cycles_with_estimated_begins() {
    let engine = engine();
    let a_begin = Utc.with_ymd_and_hms(2008, 1, 16, 0, 0, 0).unwrap();
    let boundary = day(20);
    let a = engine
        .create_slot(
            MACHINE,
            TimeRange::new(a_begin, Some(boundary)),
            SlotContext::default(),
        )
        .unwrap();
    engine
        .create_slot(MACHINE, TimeRange::since(boundary), SlotContext::default())
        .unwrap();

    engine.stop_cycle(MACHINE, day(19)).unwrap();
    engine.stop_cycle(MACHINE, day(20)).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 2);

    assert_eq!(cycles[0].begin, Some(a_begin));
    assert!(cycles[0].status.begin_estimated);
    assert_eq!(cycles[0].end, Some(day(19)));
    assert!(!cycles[0].status.end_estimated);
    assert_eq!(cycles[0].slot, Some(a));

    // A cycle ending exactly on the slot boundary belongs to the earlier
    // slot, and its estimated begin is the previous cycle's end.
    assert_eq!(cycles[1].begin, Some(day(19)));
    assert!(cycles[1].status.begin_estimated);
    assert_eq!(cycles[1].end, Some(day(20)));
    assert_eq!(cycles[1].slot, Some(a));

    let slot = engine.slot(MACHINE, a).unwrap();
    assert_eq!(slot.total_cycles, 2);
    assert_eq!(slot.partial_cycles, 0);
    assert_eq!(slot.average_cycle_time, Some(Duration::days(1)));
}

#[test]
fn test_cycle_offset_against_machining_duration() {
    let operation = Operation::new(OperationId(5), "drill")
        .with_machining_duration(Duration::seconds(30));
    let engine = engine_with_operation(operation);
    engine
        .create_slot(
            MACHINE,
            TimeRange::since(day(1)),
            SlotContext::with_operation(OperationId(5)),
        )
        .unwrap();

    let t1 = day(1) + Duration::hours(8);
    engine.start_cycle(MACHINE, t1).unwrap();
    engine.stop_cycle(MACHINE, t1 + Duration::seconds(45)).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].offset_duration, Some(50.0));

    engine.empty_accumulators();
    let rows = engine.cycle_duration_summaries();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].offset, 50);
    assert_eq!(rows[0].full, 1);
    assert_eq!(rows[0].partial, 0);
}

#[test]
fn test_starts_without_stops_stay_partial() {
    let engine = engine();
    let slot = engine
        .create_slot(MACHINE, TimeRange::since(day(1)), SlotContext::default())
        .unwrap();

    engine.start_cycle(MACHINE, day(2)).unwrap();
    engine.start_cycle(MACHINE, day(3)).unwrap();
    engine.start_cycle(MACHINE, day(4)).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 3);
    assert!(cycles[0].status.end_estimated);
    assert_eq!(cycles[0].end, Some(day(3)));
    assert!(cycles[1].status.end_estimated);
    assert_eq!(cycles[1].end, Some(day(4)));
    assert_eq!(cycles[2].end, None);
    assert!(cycles.iter().all(|c| !c.is_full()));

    let slot = engine.slot(MACHINE, slot).unwrap();
    assert_eq!(slot.partial_cycles, 3);
    assert_eq!(slot.total_cycles, 0);
    assert_eq!(slot.average_cycle_time, None);

    // Each start over a still-open cycle is an ordering violation.
    assert_eq!(error_count(&engine), 2);
}

#[test]
fn test_mixed_sequence_counts_and_gap_records() {
    let engine = engine();
    let slot = engine
        .create_slot(MACHINE, TimeRange::since(day(1)), SlotContext::default())
        .unwrap();

    engine.start_cycle(MACHINE, day(1)).unwrap();
    engine.start_cycle(MACHINE, day(2)).unwrap();
    engine.stop_cycle(MACHINE, day(3)).unwrap();
    engine.start_cycle(MACHINE, day(3)).unwrap();
    engine.stop_cycle(MACHINE, day(4)).unwrap();
    engine.stop_cycle(MACHINE, day(5)).unwrap();
    engine.start_cycle(MACHINE, day(5)).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 5);
    assert_eq!(cycles.iter().filter(|c| c.is_full()).count(), 3);

    let slot = engine.slot(MACHINE, slot).unwrap();
    assert_eq!(slot.total_cycles, 3);
    assert_eq!(slot.partial_cycles, 2);
    assert_eq!(slot.average_cycle_time, Some(Duration::days(1)));

    // Only the start events following a full cycle open a gap record; the
    // stop-stop pair does not. Zero-width gaps are kept, with no nominal
    // duration their offset is null.
    let gaps = engine.between_cycles(MACHINE).unwrap();
    assert_eq!(gaps.len(), 2);
    assert!(gaps.iter().all(|g| g.offset_duration.is_none()));
}

#[test]
fn test_splitting_a_slot_splits_the_cycle_it_contains() {
    let engine = engine();
    let slot = engine
        .create_slot(
            MACHINE,
            TimeRange::new(day(1), Some(day(10))),
            SlotContext::default(),
        )
        .unwrap();
    engine.start_cycle(MACHINE, day(2)).unwrap();
    engine.stop_cycle(MACHINE, day(4)).unwrap();

    let (left, right) = engine.split_slot(MACHINE, slot, day(3)).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 2);

    assert_eq!(cycles[0].begin, Some(day(2)));
    assert!(!cycles[0].status.begin_estimated);
    assert_eq!(cycles[0].end, Some(day(3)));
    assert!(cycles[0].status.end_estimated);
    assert_eq!(cycles[0].slot, Some(left));

    assert_eq!(cycles[1].begin, Some(day(3)));
    assert!(cycles[1].status.begin_estimated);
    assert_eq!(cycles[1].end, Some(day(4)));
    assert!(!cycles[1].status.end_estimated);
    assert_eq!(cycles[1].slot, Some(right));

    let left = engine.slot(MACHINE, left).unwrap();
    assert_eq!(left.total_cycles, 0);
    assert_eq!(left.partial_cycles, 1);
    let right = engine.slot(MACHINE, right).unwrap();
    assert_eq!(right.total_cycles, 1);
    assert_eq!(right.partial_cycles, 0);
}

#[test]
fn test_splitting_within_margin_of_the_cycle_begin_moves_it_whole() {
    let engine = engine();
    let slot = engine
        .create_slot(
            MACHINE,
            TimeRange::new(day(1), Some(day(10))),
            SlotContext::default(),
        )
        .unwrap();
    engine.start_cycle(MACHINE, day(2)).unwrap();
    engine.stop_cycle(MACHINE, day(4)).unwrap();

    let at = day(2) + Duration::seconds(10);
    let (left, right) = engine.split_slot(MACHINE, slot, at).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 1, "a cycle near the boundary is not split");
    assert_eq!(cycles[0].slot, Some(right));
    assert!(cycles[0].status.is_clear());

    assert_eq!(engine.slot(MACHINE, left).unwrap().total_cycles, 0);
    assert_eq!(engine.slot(MACHINE, right).unwrap().total_cycles, 1);
}

#[test]
fn test_stop_within_margin_of_slot_begin_reattaches_the_whole_cycle() {
    let engine = engine();
    engine
        .create_slot(
            MACHINE,
            TimeRange::new(day(1), Some(day(5))),
            SlotContext::with_operation(OperationId(1)),
        )
        .unwrap();
    let b = engine
        .create_slot(
            MACHINE,
            TimeRange::new(day(5), Some(day(9))),
            SlotContext::with_operation(OperationId(2)),
        )
        .unwrap();

    let begin = day(5) - Duration::seconds(10);
    engine.start_cycle(MACHINE, begin).unwrap();
    engine.stop_cycle(MACHINE, day(6)).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].slot, Some(b));
    assert_eq!(cycles[0].begin, Some(begin));
    assert!(cycles[0].is_full());
}

#[test]
fn test_stop_before_open_cycle_begin_creates_standalone_record() {
    let engine = engine();
    engine.start_cycle(MACHINE, day(2)).unwrap();
    engine.stop_cycle(MACHINE, day(1)).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0].begin, None);
    assert_eq!(cycles[0].end, Some(day(1)));
    assert_eq!(cycles[1].begin, Some(day(2)));
    assert_eq!(cycles[1].end, None);
    assert_eq!(error_count(&engine), 1);
}

#[test]
fn test_stop_before_last_full_cycle_end_creates_standalone_record() {
    let engine = engine();
    engine.start_cycle(MACHINE, day(1)).unwrap();
    engine.stop_cycle(MACHINE, day(3)).unwrap();
    engine.stop_cycle(MACHINE, day(2)).unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 2);
    assert_eq!(cycles[0].begin, None);
    assert_eq!(cycles[0].end, Some(day(2)));
    assert_eq!(error_count(&engine), 1);
}

#[test]
fn test_late_stop_extends_the_slot_with_a_warning() {
    let engine = engine();
    let slot = engine
        .create_slot(
            MACHINE,
            TimeRange::new(day(1), Some(day(2))),
            SlotContext::default(),
        )
        .unwrap();

    let at = day(2) + Duration::seconds(10);
    engine.stop_cycle(MACHINE, at).unwrap();

    assert_eq!(engine.slot(MACHINE, slot).unwrap().range.end, Some(at));
    let warns = engine
        .detection_log(MACHINE)
        .unwrap()
        .iter()
        .filter(|e| e.severity == Severity::Warn)
        .count();
    assert_eq!(warns, 1);

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].slot, Some(slot));
}

#[test]
fn test_stop_stop_collapses_into_one_cycle_when_extension_is_enabled() {
    let config = AnalysisConfig {
        extend_full_cycle_on_new_cycle_end: true,
        ..Default::default()
    };
    let mut extending = Engine::new(config);
    extending.register_machine(Machine::new(MACHINE, "mill-1"));
    let slot = extending
        .create_slot(MACHINE, TimeRange::since(day(1)), SlotContext::default())
        .unwrap();

    extending.start_cycle(MACHINE, day(2)).unwrap();
    extending.stop_cycle(MACHINE, day(3)).unwrap();
    extending.stop_cycle(MACHINE, day(4)).unwrap();

    let cycles = extending.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].begin, Some(day(2)));
    assert_eq!(cycles[0].end, Some(day(4)));
    assert!(cycles[0].is_full());
    assert_eq!(extending.slot(MACHINE, slot).unwrap().total_cycles, 1);

    // The same sequence without the option opens a second cycle.
    let plain = engine();
    plain
        .create_slot(MACHINE, TimeRange::since(day(1)), SlotContext::default())
        .unwrap();
    plain.start_cycle(MACHINE, day(2)).unwrap();
    plain.stop_cycle(MACHINE, day(3)).unwrap();
    plain.stop_cycle(MACHINE, day(4)).unwrap();
    assert_eq!(plain.cycles(MACHINE).unwrap().len(), 2);
}

#[test]
fn test_start_stop_event_produces_one_full_cycle_and_gap_record() {
    let engine = engine();
    engine
        .create_slot(MACHINE, TimeRange::since(day(1)), SlotContext::default())
        .unwrap();

    engine
        .start_stop_cycle(MACHINE, day(2), day(3))
        .unwrap();
    engine
        .start_stop_cycle(MACHINE, day(4), day(5))
        .unwrap();

    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 2);
    assert!(cycles.iter().all(|c| c.is_full() && c.status.is_clear()));
    assert_eq!(engine.between_cycles(MACHINE).unwrap().len(), 1);
}

#[test]
fn test_start_stop_spanning_an_operation_change_splits_into_events() {
    let engine = engine();
    engine
        .create_slot(
            MACHINE,
            TimeRange::new(day(1), Some(day(5))),
            SlotContext::with_operation(OperationId(1)),
        )
        .unwrap();
    let b = engine
        .create_slot(
            MACHINE,
            TimeRange::new(day(5), Some(day(9))),
            SlotContext::with_operation(OperationId(2)),
        )
        .unwrap();

    engine.start_stop_cycle(MACHINE, day(2), day(6)).unwrap();

    // Replayed as an independent start and stop: the start stays behind as
    // a partial cycle, the stop opens an estimated-begin cycle in the slot
    // that covers it.
    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 2);
    assert!(!cycles[0].is_full());
    assert_eq!(cycles[0].begin, Some(day(2)));
    assert!(cycles[1].is_full());
    assert!(cycles[1].status.begin_estimated);
    assert_eq!(cycles[1].slot, Some(b));
}

#[test]
fn test_stop_shortly_before_a_slot_begins_keeps_the_observed_end() {
    let engine = engine();
    let slot = engine
        .create_slot(
            MACHINE,
            TimeRange::since(day(2) + Duration::seconds(10)),
            SlotContext::default(),
        )
        .unwrap();

    engine.stop_cycle(MACHINE, day(2)).unwrap();

    // The margin attaches the stop to the upcoming slot; the slot begin
    // cannot serve as an estimated begin because it follows the stop.
    let cycles = engine.cycles(MACHINE).unwrap();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].end, Some(day(2)));
    assert!(!cycles[0].status.end_estimated);
    assert_eq!(cycles[0].begin, None);
    assert_eq!(cycles[0].slot, Some(slot));
    assert_eq!(engine.slot(MACHINE, slot).unwrap().total_cycles, 1);
    assert!(engine.detection_log(MACHINE).unwrap().is_empty());
}
