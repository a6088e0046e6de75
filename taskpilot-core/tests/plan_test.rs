use proptest::prelude::*;
use taskpilot_core::models::{Plan, Step, StepStatus};
use taskpilot_core::plan::{
    is_complete, mark_complete, mark_failed, mark_running, mark_skipped, next_step, progress,
    revise,
};

fn plan_of(n: usize) -> Plan {
    Plan::new(
        "build the site",
        (1..=n)
            .map(|i| Step::new(format!("s{}", i), format!("Step number {}", i)))
            .collect(),
    )
}

fn rank(status: StepStatus) -> u8 {
    match status {
        StepStatus::Pending => 0,
        StepStatus::Running => 1,
        StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped => 2,
    }
}

#[derive(Debug, Clone)]
enum Op {
    Start(usize),
    Complete(usize),
    Fail(usize),
    Skip(usize),
}

fn op_strategy(steps: usize) -> impl Strategy<Value = Op> {
    (0..4u8, 0..steps).prop_map(|(kind, index)| match kind {
        0 => Op::Start(index),
        1 => Op::Complete(index),
        2 => Op::Fail(index),
        _ => Op::Skip(index),
    })
}

fn apply(plan: &Plan, op: &Op) -> Option<Plan> {
    let id = |i: usize| format!("s{}", i + 1);
    match op {
        Op::Start(i) => mark_running(plan, &id(*i)).ok(),
        Op::Complete(i) => mark_complete(plan, &id(*i), "ok").ok(),
        Op::Fail(i) => mark_failed(plan, &id(*i), "broken").ok(),
        Op::Skip(i) => mark_skipped(plan, &id(*i)).ok(),
    }
}

mod transition_property_tests {
    use super::*;

    proptest! {
        #[test]
        fn statuses_never_move_backwards(ops in prop::collection::vec(op_strategy(5), 0..40)) {
            let mut plan = plan_of(5);

            for op in &ops {
                let before = plan.clone();
                if let Some(next) = apply(&plan, op) {
                    for (old, new) in before.steps.iter().zip(next.steps.iter()) {
                        prop_assert!(rank(new.status) >= rank(old.status));
                        if old.status.is_terminal() {
                            prop_assert_eq!(old.status, new.status);
                        }
                    }
                    prop_assert_eq!(before.steps.len(), next.steps.len());
                    plan = next;
                }
                prop_assert!(progress(&plan).running <= 1);
            }
        }

        #[test]
        fn rejected_transition_leaves_input_untouched(ops in prop::collection::vec(op_strategy(4), 1..20)) {
            let mut plan = plan_of(4);
            for op in &ops {
                let snapshot = plan.clone();
                match apply(&plan, op) {
                    Some(next) => plan = next,
                    None => prop_assert_eq!(&plan, &snapshot),
                }
            }
        }

        #[test]
        fn repeated_revisions_keep_one_marker(obstacles in prop::collection::vec("[a-z]{1,12}", 1..6)) {
            let mut plan = plan_of(2);
            plan = mark_running(&plan, "s1").unwrap();
            plan = mark_failed(&plan, "s1", "first").unwrap();

            let mut target = "s1".to_string();
            for obstacle in &obstacles {
                plan = revise(&plan, obstacle, &target).unwrap();
                let index = plan.position(&target).unwrap();
                let retry = &plan.steps[index + 1];

                prop_assert_eq!(retry.retry_of.as_deref(), Some(target.as_str()));
                prop_assert_eq!(retry.status, StepStatus::Pending);
                prop_assert_eq!(retry.description.matches("(retry after: ").count(), 1);
                prop_assert!(retry.description.starts_with("Step number 1"));
                target = retry.id.clone();
            }

            prop_assert_eq!(plan.steps.len(), 2 + obstacles.len());
        }
    }
}

mod revision_tests {
    use super::*;

    #[test]
    fn test_revise_pending_step_retires_it() {
        let plan = plan_of(3);
        let revised = revise(&plan, "stalled", "s2").unwrap();

        assert_eq!(revised.steps[1].status, StepStatus::Failed);
        assert_eq!(revised.steps[1].error.as_deref(), Some("stalled"));
        assert_eq!(revised.steps[2].id, "s2-retry-1");
        assert_eq!(revised.steps[3].id, "s3");
        assert_eq!(plan.steps.len(), 3);
    }

    #[test]
    fn test_revise_failed_step_twice_adds_fresh_ids() {
        let plan = mark_running(&plan_of(1), "s1").unwrap();
        let plan = mark_failed(&plan, "s1", "boom").unwrap();

        let once = revise(&plan, "boom", "s1").unwrap();
        let twice = revise(&once, "boom again", "s1").unwrap();

        assert_eq!(twice.steps[0].error.as_deref(), Some("boom again"));
        assert_eq!(twice.steps[1].id, "s1-retry-2");
        assert_eq!(twice.steps[2].id, "s1-retry-1");
    }

    #[test]
    fn test_completed_retry_resolves_failure() {
        let plan = mark_running(&plan_of(2), "s1").unwrap();
        let plan = mark_failed(&plan, "s1", "boom").unwrap();
        let mut plan = revise(&plan, "boom", "s1").unwrap();

        while let Some(step) = next_step(&plan).cloned() {
            plan = mark_running(&plan, &step.id).unwrap();
            plan = mark_complete(&plan, &step.id, "done").unwrap();
        }

        assert!(is_complete(&plan));
        assert_eq!(progress(&plan).failed, 1);
        assert_eq!(progress(&plan).completed, 2);
    }

    #[test]
    fn test_revise_completed_step_is_rejected() {
        let plan = mark_running(&plan_of(1), "s1").unwrap();
        let plan = mark_complete(&plan, "s1", "ok").unwrap();
        assert!(revise(&plan, "late", "s1").is_err());
    }
}
