use chrono::{DateTime, Duration, TimeZone, Utc};
use cycle_analysis::config::AnalysisConfig;
use cycle_analysis::engine::Engine;
use cycle_analysis::models::{Machine, MachineId, Operation, OperationId, SlotContext, TimeRange};
use proptest::prelude::*;

const MACHINE: MachineId = MachineId(1);

fn start_of_stream() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2012, 6, 1, 0, 0, 0).unwrap()
}

fn engine_with_slot() -> Engine {
    let mut engine = Engine::new(AnalysisConfig::default());
    engine.register_machine(Machine::new(MACHINE, "mill-1"));
    engine.register_operation(
        Operation::new(OperationId(1), "drill").with_machining_duration(Duration::minutes(30)),
    );
    engine
        .create_slot(
            MACHINE,
            TimeRange::since(start_of_stream()),
            SlotContext::with_operation(OperationId(1)),
        )
        .unwrap();
    engine
}

/// An event stream: true is a start, false a stop, each a strictly
/// positive number of minutes after the previous event.
fn event_stream() -> impl Strategy<Value = Vec<(bool, u32)>> {
    prop::collection::vec((any::<bool>(), 1u32..120), 1..40)
}

fn apply(engine: &Engine, events: &[(bool, u32)]) {
    let mut t = start_of_stream();
    for (is_start, minutes) in events {
        t += Duration::minutes(i64::from(*minutes));
        if *is_start {
            engine.start_cycle(MACHINE, t).unwrap();
        } else {
            engine.stop_cycle(MACHINE, t).unwrap();
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_average_cycle_time_follows_full_count(events in event_stream()) {
        let engine = engine_with_slot();
        apply(&engine, &events);
        for slot in engine.slots(MACHINE).unwrap() {
            prop_assert_eq!(
                slot.average_cycle_time.is_some(),
                slot.total_cycles > 1,
                "slot {:?}",
                slot.id
            );
        }
    }

    #[test]
    fn prop_summaries_equal_slot_counters(events in event_stream()) {
        let engine = engine_with_slot();
        apply(&engine, &events);
        engine.empty_accumulators();

        let slots = engine.slots(MACHINE).unwrap();
        for row in engine.cycle_count_summaries() {
            let full: i64 = slots
                .iter()
                .filter(|s| s.context.summary_key(MACHINE) == row.key)
                .map(|s| i64::from(s.total_cycles))
                .sum();
            let partial: i64 = slots
                .iter()
                .filter(|s| s.context.summary_key(MACHINE) == row.key)
                .map(|s| i64::from(s.partial_cycles))
                .sum();
            prop_assert_eq!(row.full, full);
            prop_assert_eq!(row.partial, partial);
        }

        // Every cycle of a fully covered timeline is attached and counted
        // exactly once.
        let cycles = engine.cycles(MACHINE).unwrap();
        prop_assert!(cycles.iter().all(|c| c.slot.is_some()));
        let counted: u32 = slots
            .iter()
            .map(|s| s.total_cycles + s.partial_cycles)
            .sum();
        prop_assert_eq!(counted as usize, cycles.len());
    }

    #[test]
    fn prop_consolidation_is_idempotent(events in event_stream()) {
        let engine = engine_with_slot();
        apply(&engine, &events);

        let slot = engine.slots(MACHINE).unwrap()[0].id;
        engine.consolidate(MACHINE, slot).unwrap();
        let slots = serde_json::to_value(engine.slots(MACHINE).unwrap()).unwrap();
        let cycles = serde_json::to_value(engine.cycles(MACHINE).unwrap()).unwrap();
        let gaps = serde_json::to_value(engine.between_cycles(MACHINE).unwrap()).unwrap();

        engine.consolidate(MACHINE, slot).unwrap();
        prop_assert_eq!(serde_json::to_value(engine.slots(MACHINE).unwrap()).unwrap(), slots);
        prop_assert_eq!(serde_json::to_value(engine.cycles(MACHINE).unwrap()).unwrap(), cycles);
        prop_assert_eq!(
            serde_json::to_value(engine.between_cycles(MACHINE).unwrap()).unwrap(),
            gaps
        );
    }
}
