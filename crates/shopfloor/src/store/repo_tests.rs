//! Repository tests against an in-memory database with the full schema.

use super::Store;
use super::domain::*;
use super::error::StoreError;
use super::patch::*;
use super::repository::*;

async fn open_store() -> Store {
    let store = Store::open_in_memory().unwrap();
    store.migrate().await.unwrap();
    store
}

async fn seed_project(store: &Store, id: &str) -> Project {
    store
        .projects
        .create(NewProject {
            id: id.to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn seed_order(store: &Store, project_id: &str, title: &str) -> Order {
    store
        .orders
        .create(
            project_id,
            NewOrder {
                title: title.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

async fn seed_task(store: &Store, order_id: &str, title: &str) -> Task {
    store
        .tasks
        .create(
            order_id,
            NewTask {
                title: title.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
}

/// Walk a queued task through execution into review.
async fn task_into_review(store: &Store, task_id: &str) -> (Review, Task) {
    store
        .tasks
        .set_status(task_id, TaskStatus::InProgress, "runner", None)
        .await
        .unwrap();
    store
        .tasks
        .set_status(task_id, TaskStatus::Done, "runner", None)
        .await
        .unwrap();
    store.reviews.submit(task_id, None, "runner").await.unwrap()
}

mod projects {
    use super::*;

    #[tokio::test]
    async fn create_uses_caller_id_and_defaults() {
        let store = open_store().await;
        let project = seed_project(&store, "alpha").await;
        assert_eq!(project.public_id, "alpha");
        assert_eq!(project.name, "alpha");
        assert_eq!(project.status, ProjectStatus::Initial);
        assert!(project.supervisor_id.is_none());

        let fetched = store.projects.get("alpha").await.unwrap();
        assert_eq!(fetched.public_id, project.public_id);
        assert_eq!(fetched.created_at, project.created_at);
    }

    #[tokio::test]
    async fn explicit_name_overrides_id() {
        let store = open_store().await;
        let project = store
            .projects
            .create(NewProject {
                id: "alpha".to_string(),
                name: Some("Alpha Rollout".to_string()),
                path: Some("/srv/alpha".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(project.name, "Alpha Rollout");
        assert_eq!(project.path.as_deref(), Some("/srv/alpha"));
    }

    #[tokio::test]
    async fn list_is_sorted_by_name() {
        let store = open_store().await;
        seed_project(&store, "zulu").await;
        seed_project(&store, "alpha").await;
        seed_project(&store, "mike").await;
        let names: Vec<String> = store
            .projects
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mike", "zulu"]);
    }

    #[tokio::test]
    async fn missing_project_is_typed() {
        let store = open_store().await;
        let err = store.projects.get("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn patch_sets_and_clears_fields() {
        let store = open_store().await;
        store
            .projects
            .create(NewProject {
                id: "alpha".to_string(),
                path: Some("/srv/alpha".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = store
            .projects
            .update(
                "alpha",
                ProjectPatch {
                    description: Patch::Set("first rollout".to_string()),
                    path: Patch::Clear,
                    status: Some(ProjectStatus::InProgress),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("first rollout"));
        assert!(updated.path.is_none());
        assert_eq!(updated.status, ProjectStatus::InProgress);
    }

    #[tokio::test]
    async fn empty_patch_is_a_no_op() {
        let store = open_store().await;
        let before = seed_project(&store, "alpha").await;
        let after = store
            .projects
            .update("alpha", ProjectPatch::default())
            .await
            .unwrap();
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn identical_values_do_not_refresh_timestamp() {
        let store = open_store().await;
        let before = seed_project(&store, "alpha").await;
        let after = store
            .projects
            .update(
                "alpha",
                ProjectPatch {
                    name: Some("alpha".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn delete_cascades_and_reports_counts() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order_a = seed_order(&store, "alpha", "first").await;
        let order_b = seed_order(&store, "alpha", "second").await;
        seed_task(&store, &order_a.public_id, "t1").await;
        seed_task(&store, &order_a.public_id, "t2").await;
        seed_task(&store, &order_b.public_id, "t3").await;
        store
            .backlogs
            .create(
                "alpha",
                NewBacklogItem {
                    title: "later".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let counts = store.projects.delete("alpha").await.unwrap();
        assert_eq!(
            counts,
            DeletedCounts {
                orders: 2,
                tasks: 3,
                backlogs: 1,
            }
        );
        assert!(matches!(
            store.projects.get("alpha").await,
            Err(StoreError::ProjectNotFound(_))
        ));
        assert!(matches!(
            store.orders.get(&order_a.public_id).await,
            Err(StoreError::OrderNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_purges_audit_of_descendants_only() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        seed_project(&store, "beta").await;
        let doomed = seed_order(&store, "alpha", "doomed").await;
        let kept = seed_order(&store, "beta", "kept").await;
        store
            .orders
            .set_status(&doomed.public_id, OrderStatus::InProgress, "ui", None)
            .await
            .unwrap();
        store
            .orders
            .set_status(&kept.public_id, OrderStatus::InProgress, "ui", None)
            .await
            .unwrap();

        store.projects.delete("alpha").await.unwrap();

        let gone = store
            .audit
            .history_for(AuditEntity::Order, &doomed.public_id)
            .await
            .unwrap();
        assert!(gone.is_empty());
        let remaining = store
            .audit
            .history_for(AuditEntity::Order, &kept.public_id)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }
}

mod orders {
    use super::*;

    #[tokio::test]
    async fn numbers_are_sequential_per_project() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        seed_project(&store, "beta").await;
        let first = seed_order(&store, "alpha", "one").await;
        let second = seed_order(&store, "alpha", "two").await;
        let other = seed_order(&store, "beta", "solo").await;
        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);
        assert_eq!(other.number, 1);
        assert_eq!(store.orders.next_number("alpha").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn create_for_missing_project_fails() {
        let store = open_store().await;
        let err = store
            .orders
            .create(
                "ghost",
                NewOrder {
                    title: "nope".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn list_orders_by_priority_then_number() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        for (title, priority) in [
            ("low-first", Priority::Low),
            ("high-second", Priority::High),
            ("medium-third", Priority::Medium),
            ("high-fourth", Priority::High),
        ] {
            store
                .orders
                .create(
                    "alpha",
                    NewOrder {
                        title: title.to_string(),
                        priority,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        let titles: Vec<String> = store
            .orders
            .list("alpha")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.title)
            .collect();
        assert_eq!(
            titles,
            vec!["high-second", "high-fourth", "medium-third", "low-first"]
        );
    }

    #[tokio::test]
    async fn set_status_audits_the_change() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let updated = store
            .orders
            .set_status(
                &order.public_id,
                OrderStatus::InProgress,
                "runner",
                Some("planning finished"),
            )
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::InProgress);

        let history = store
            .audit
            .history_for(AuditEntity::Order, &order.public_id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        let change = &history[0];
        assert_eq!(change.field, TrackedField::Status);
        assert_eq!(change.old_value.as_deref(), Some("planning"));
        assert_eq!(change.new_value.as_deref(), Some("in_progress"));
        assert_eq!(change.actor, "runner");
        assert_eq!(change.reason.as_deref(), Some("planning finished"));
    }

    #[tokio::test]
    async fn patch_audits_each_changed_field() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        store
            .orders
            .update(
                &order.public_id,
                OrderPatch {
                    title: Some("renamed".to_string()),
                    priority: Some(Priority::High),
                    ..Default::default()
                },
                "ui",
            )
            .await
            .unwrap();
        let history = store
            .audit
            .history_for(AuditEntity::Order, &order.public_id)
            .await
            .unwrap();
        let fields: Vec<TrackedField> = history.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec![TrackedField::Title, TrackedField::Priority]);
    }

    #[tokio::test]
    async fn identical_patch_writes_nothing() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let after = store
            .orders
            .update(
                &order.public_id,
                OrderPatch {
                    title: Some("one".to_string()),
                    priority: Some(Priority::Medium),
                    ..Default::default()
                },
                "ui",
            )
            .await
            .unwrap();
        assert_eq!(after.updated_at, order.updated_at);
        let history = store
            .audit
            .history_for(AuditEntity::Order, &order.public_id)
            .await
            .unwrap();
        assert!(history.is_empty());
    }
}

mod tasks {
    use super::*;

    #[tokio::test]
    async fn create_with_dependencies() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let a = seed_task(&store, &order.public_id, "a").await;
        let b = seed_task(&store, &order.public_id, "b").await;
        let c = store
            .tasks
            .create(
                &order.public_id,
                NewTask {
                    title: "c".to_string(),
                    depends_on: vec![b.public_id.clone(), a.public_id.clone()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let mut expected = vec![a.public_id, b.public_id];
        expected.sort();
        assert_eq!(c.depends_on, expected);
        assert_eq!(c.number, 3);
        assert_eq!(c.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn unknown_dependency_fails() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let err = store
            .tasks
            .create(
                &order.public_id,
                NewTask {
                    title: "c".to_string(),
                    depends_on: vec!["not-a-task".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(id) if id == "not-a-task"));
    }

    #[tokio::test]
    async fn dependency_must_be_in_same_order() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let one = seed_order(&store, "alpha", "one").await;
        let two = seed_order(&store, "alpha", "two").await;
        let foreign = seed_task(&store, &one.public_id, "foreign").await;
        let err = store
            .tasks
            .create(
                &two.public_id,
                NewTask {
                    title: "local".to_string(),
                    depends_on: vec![foreign.public_id],
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn status_writes_stamp_lifecycle_timestamps() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;
        assert!(task.started_at.is_none());

        let started = store
            .tasks
            .set_status(&task.public_id, TaskStatus::InProgress, "runner", None)
            .await
            .unwrap();
        assert!(started.started_at.is_some());
        assert!(started.completed_at.is_none());

        store
            .tasks
            .set_status(&task.public_id, TaskStatus::Done, "runner", None)
            .await
            .unwrap();
        let completed = store
            .tasks
            .set_status(&task.public_id, TaskStatus::Completed, "reviewer", None)
            .await
            .unwrap();
        assert!(completed.completed_at.is_some());
        // First start time survives later transitions.
        assert_eq!(completed.started_at, started.started_at);
    }

    #[tokio::test]
    async fn rework_does_not_reset_started_at() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;
        let started = store
            .tasks
            .set_status(&task.public_id, TaskStatus::InProgress, "runner", None)
            .await
            .unwrap();
        store
            .tasks
            .set_status(&task.public_id, TaskStatus::Rework, "reviewer", None)
            .await
            .unwrap();
        let again = store
            .tasks
            .set_status(&task.public_id, TaskStatus::InProgress, "runner", None)
            .await
            .unwrap();
        assert_eq!(again.started_at, started.started_at);
    }

    #[tokio::test]
    async fn patch_replaces_dependency_list_and_audits() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let a = seed_task(&store, &order.public_id, "a").await;
        let b = seed_task(&store, &order.public_id, "b").await;
        let c = store
            .tasks
            .create(
                &order.public_id,
                NewTask {
                    title: "c".to_string(),
                    depends_on: vec![a.public_id.clone()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = store
            .tasks
            .update(
                &c.public_id,
                TaskPatch {
                    depends_on: Some(vec![b.public_id.clone()]),
                    ..Default::default()
                },
                "ui",
            )
            .await
            .unwrap();
        assert_eq!(updated.depends_on, vec![b.public_id.clone()]);

        let history = store
            .audit
            .history_for(AuditEntity::Task, &c.public_id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].field, TrackedField::Dependencies);
        assert_eq!(history[0].old_value.as_deref(), Some(a.public_id.as_str()));
        assert_eq!(history[0].new_value.as_deref(), Some(b.public_id.as_str()));
    }

    #[tokio::test]
    async fn patch_clears_assignee() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = store
            .tasks
            .create(
                &order.public_id,
                NewTask {
                    title: "t".to_string(),
                    assignee: Some("worker-1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = store
            .tasks
            .update(
                &task.public_id,
                TaskPatch {
                    assignee: Patch::Clear,
                    ..Default::default()
                },
                "ui",
            )
            .await
            .unwrap();
        assert!(updated.assignee.is_none());

        let history = store
            .audit
            .history_for(AuditEntity::Task, &task.public_id)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].field, TrackedField::Assignee);
        assert_eq!(history[0].old_value.as_deref(), Some("worker-1"));
        assert!(history[0].new_value.is_none());
    }

    #[tokio::test]
    async fn reject_counter_increments() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;
        assert_eq!(task.reject_count, 0);
        store
            .tasks
            .increment_reject_count(&task.public_id)
            .await
            .unwrap();
        let task = store
            .tasks
            .increment_reject_count(&task.public_id)
            .await
            .unwrap();
        assert_eq!(task.reject_count, 2);
    }

    #[tokio::test]
    async fn list_is_ordered_by_number() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        seed_task(&store, &order.public_id, "first").await;
        seed_task(&store, &order.public_id, "second").await;
        seed_task(&store, &order.public_id, "third").await;
        let numbers: Vec<i64> = store
            .tasks
            .list(&order.public_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }
}

mod backlogs {
    use super::*;

    #[tokio::test]
    async fn create_numbers_within_project() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let first = store
            .backlogs
            .create(
                "alpha",
                NewBacklogItem {
                    title: "idea".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(first.status, BacklogStatus::Todo);
        assert!(first.order_id.is_none());
    }

    #[tokio::test]
    async fn deleting_the_highest_item_frees_its_number() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let mut items = Vec::new();
        for title in ["keep", "drop"] {
            items.push(
                store
                    .backlogs
                    .create(
                        "alpha",
                        NewBacklogItem {
                            title: title.to_string(),
                            ..Default::default()
                        },
                    )
                    .await
                    .unwrap(),
            );
        }
        assert_eq!(items[1].number, 2);

        store.backlogs.delete(&items[1].public_id).await.unwrap();

        // Numbers come from the live maximum, not a retained counter.
        let replacement = store
            .backlogs
            .create(
                "alpha",
                NewBacklogItem {
                    title: "again".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(replacement.number, 2);
    }

    #[tokio::test]
    async fn link_marks_item_in_order_and_is_idempotent() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let item = store
            .backlogs
            .create(
                "alpha",
                NewBacklogItem {
                    title: "promote me".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let linked = store
            .backlogs
            .link_to_order(&item.public_id, &order.public_id)
            .await
            .unwrap();
        assert_eq!(linked.status, BacklogStatus::InOrder);
        assert_eq!(linked.order_id.as_deref(), Some(order.public_id.as_str()));

        let relinked = store
            .backlogs
            .link_to_order(&item.public_id, &order.public_id)
            .await
            .unwrap();
        assert_eq!(relinked.updated_at, linked.updated_at);
    }

    #[tokio::test]
    async fn delete_missing_is_typed() {
        let store = open_store().await;
        let err = store.backlogs.delete("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::BacklogNotFound(_)));
    }

    #[tokio::test]
    async fn priority_edits_remain_possible_after_linking() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let item = store
            .backlogs
            .create(
                "alpha",
                NewBacklogItem {
                    title: "promote me".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .backlogs
            .link_to_order(&item.public_id, &order.public_id)
            .await
            .unwrap();

        let updated = store
            .backlogs
            .update(
                &item.public_id,
                BacklogPatch {
                    priority: Some(Priority::High),
                    description: Patch::Set("urgent after all".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.priority, Priority::High);
        assert_eq!(updated.status, BacklogStatus::InOrder);
    }
}

mod reviews {
    use super::*;

    #[tokio::test]
    async fn submit_moves_task_into_review() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;
        let (review, task) = task_into_review(&store, &task.public_id).await;
        assert_eq!(review.status, ReviewStatus::Pending);
        assert!(review.reviewed_at.is_none());
        assert_eq!(task.status, TaskStatus::InReview);
    }

    #[tokio::test]
    async fn approval_completes_the_task() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;
        let (review, _) = task_into_review(&store, &task.public_id).await;

        let resolution = store
            .reviews
            .resolve(
                &review.public_id,
                ReviewOutcome::Approve,
                Some("looks right".to_string()),
                "reviewer",
            )
            .await
            .unwrap();
        assert_eq!(resolution.review.status, ReviewStatus::Approved);
        assert!(resolution.review.reviewed_at.is_some());
        assert_eq!(resolution.review.comment.as_deref(), Some("looks right"));
        assert_eq!(resolution.task.status, TaskStatus::Completed);
        assert!(resolution.task.completed_at.is_some());
        assert!(resolution.escalation.is_none());
    }

    #[tokio::test]
    async fn rejection_bumps_counter_and_sends_rework() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;
        let (review, _) = task_into_review(&store, &task.public_id).await;

        let resolution = store
            .reviews
            .resolve(
                &review.public_id,
                ReviewOutcome::Reject,
                Some("off by one".to_string()),
                "reviewer",
            )
            .await
            .unwrap();
        assert_eq!(resolution.review.status, ReviewStatus::Rejected);
        assert_eq!(resolution.task.status, TaskStatus::Rework);
        assert_eq!(resolution.task.reject_count, 1);
    }

    #[tokio::test]
    async fn reject_count_matches_rejected_rounds() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;

        for round in 1..=3 {
            let (review, _) = task_into_review(&store, &task.public_id).await;
            let resolution = store
                .reviews
                .resolve(&review.public_id, ReviewOutcome::Reject, None, "reviewer")
                .await
                .unwrap();
            assert_eq!(resolution.task.reject_count, round);
        }

        let reviews = store.reviews.list_for_task(&task.public_id).await.unwrap();
        assert_eq!(reviews.len(), 3);
        assert!(reviews.iter().all(|r| r.status == ReviewStatus::Rejected));
    }

    #[tokio::test]
    async fn escalation_keeps_task_in_review() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;
        let (review, _) = task_into_review(&store, &task.public_id).await;

        let resolution = store
            .reviews
            .resolve(
                &review.public_id,
                ReviewOutcome::Escalate {
                    reason: "requirements unclear".to_string(),
                },
                None,
                "reviewer",
            )
            .await
            .unwrap();
        assert_eq!(resolution.review.status, ReviewStatus::Escalated);
        assert_eq!(resolution.task.status, TaskStatus::InReview);
        let escalation = resolution.escalation.unwrap();
        assert_eq!(escalation.reason, "requirements unclear");
        assert!(!escalation.is_resolved());
    }

    #[tokio::test]
    async fn resolving_escalation_returns_task_to_progress() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;
        let (review, _) = task_into_review(&store, &task.public_id).await;
        let resolution = store
            .reviews
            .resolve(
                &review.public_id,
                ReviewOutcome::Escalate {
                    reason: "requirements unclear".to_string(),
                },
                None,
                "reviewer",
            )
            .await
            .unwrap();
        let escalation = resolution.escalation.unwrap();

        let resolved = store
            .reviews
            .resolve_escalation(&escalation.public_id, "split the task", "lead")
            .await
            .unwrap();
        assert!(resolved.escalation.is_resolved());
        assert_eq!(
            resolved.escalation.resolution.as_deref(),
            Some("split the task")
        );
        assert!(resolved.reopened);
        assert_eq!(resolved.task.status, TaskStatus::InProgress);

        // Second resolution is a no-op.
        let again = store
            .reviews
            .resolve_escalation(&escalation.public_id, "different note", "lead")
            .await
            .unwrap();
        assert_eq!(
            again.escalation.resolution.as_deref(),
            Some("split the task")
        );
        assert!(!again.reopened);
    }

    #[tokio::test]
    async fn latest_for_order_returns_last_round_per_task() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;

        let (first, _) = task_into_review(&store, &task.public_id).await;
        store
            .reviews
            .resolve(&first.public_id, ReviewOutcome::Reject, None, "reviewer")
            .await
            .unwrap();
        let (second, _) = task_into_review(&store, &task.public_id).await;

        let latest = store
            .reviews
            .latest_for_order(&order.public_id)
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].task_id, task.public_id);
        assert_eq!(latest[0].review.public_id, second.public_id);
        assert_eq!(latest[0].review.status, ReviewStatus::Pending);
    }
}

mod supervisors {
    use super::*;

    #[tokio::test]
    async fn create_and_assign_to_project() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let supervisor = store.supervisors.create("platform").await.unwrap();

        let project = store
            .projects
            .update(
                "alpha",
                ProjectPatch {
                    supervisor_id: Patch::Set(supervisor.public_id.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(
            project.supervisor_id.as_deref(),
            Some(supervisor.public_id.as_str())
        );
    }

    #[tokio::test]
    async fn assigning_unknown_supervisor_fails() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let err = store
            .projects
            .update(
                "alpha",
                ProjectPatch {
                    supervisor_id: Patch::Set("ghost".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SupervisorNotFound(_)));
    }

    #[tokio::test]
    async fn items_number_per_supervisor() {
        let store = open_store().await;
        let supervisor = store.supervisors.create("platform").await.unwrap();
        let first = store
            .supervisors
            .add_item(
                &supervisor.public_id,
                NewCrossProjectItem {
                    title: "upgrade toolchain".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let second = store
            .supervisors
            .add_item(
                &supervisor.public_id,
                NewCrossProjectItem {
                    title: "rotate credentials".to_string(),
                    priority: Priority::High,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.number, 1);
        assert_eq!(second.number, 2);

        let titles: Vec<String> = store
            .supervisors
            .list_items(&supervisor.public_id)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.title)
            .collect();
        assert_eq!(titles, vec!["rotate credentials", "upgrade toolchain"]);
    }

    #[tokio::test]
    async fn dispatch_copies_into_project_backlog() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let supervisor = store.supervisors.create("platform").await.unwrap();
        let item = store
            .supervisors
            .add_item(
                &supervisor.public_id,
                NewCrossProjectItem {
                    title: "upgrade toolchain".to_string(),
                    priority: Priority::High,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = store
            .supervisors
            .dispatch_item(&item.public_id, "alpha")
            .await
            .unwrap();
        assert_eq!(outcome.item.status, BacklogStatus::InOrder);
        assert_eq!(outcome.item.dispatched_project_id.as_deref(), Some("alpha"));
        assert_eq!(outcome.backlog.title, "upgrade toolchain");
        assert_eq!(outcome.backlog.priority, Priority::High);
        assert_eq!(outcome.backlog.status, BacklogStatus::Todo);

        let backlog = store.backlogs.list("alpha").await.unwrap();
        assert_eq!(backlog.len(), 1);
    }

    #[tokio::test]
    async fn repeat_dispatch_to_same_project_reuses_row() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let supervisor = store.supervisors.create("platform").await.unwrap();
        let item = store
            .supervisors
            .add_item(
                &supervisor.public_id,
                NewCrossProjectItem {
                    title: "upgrade toolchain".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let first = store
            .supervisors
            .dispatch_item(&item.public_id, "alpha")
            .await
            .unwrap();
        let second = store
            .supervisors
            .dispatch_item(&item.public_id, "alpha")
            .await
            .unwrap();
        assert_eq!(first.backlog.public_id, second.backlog.public_id);
        assert_eq!(store.backlogs.list("alpha").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn dispatch_to_second_project_is_rejected() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        seed_project(&store, "beta").await;
        let supervisor = store.supervisors.create("platform").await.unwrap();
        let item = store
            .supervisors
            .add_item(
                &supervisor.public_id,
                NewCrossProjectItem {
                    title: "upgrade toolchain".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store
            .supervisors
            .dispatch_item(&item.public_id, "alpha")
            .await
            .unwrap();

        let err = store
            .supervisors
            .dispatch_item(&item.public_id, "beta")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Other(_)));
    }
}

mod audit {
    use super::*;

    #[tokio::test]
    async fn history_is_ordered_and_complete() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        let task = seed_task(&store, &order.public_id, "t").await;

        store
            .tasks
            .set_status(&task.public_id, TaskStatus::InProgress, "runner", None)
            .await
            .unwrap();
        store
            .tasks
            .update(
                &task.public_id,
                TaskPatch {
                    assignee: Patch::Set("worker-1".to_string()),
                    ..Default::default()
                },
                "ui",
            )
            .await
            .unwrap();
        store
            .tasks
            .set_status(&task.public_id, TaskStatus::Done, "runner", None)
            .await
            .unwrap();

        let history = store
            .audit
            .history_for(AuditEntity::Task, &task.public_id)
            .await
            .unwrap();
        let fields: Vec<TrackedField> = history.iter().map(|c| c.field).collect();
        assert_eq!(
            fields,
            vec![
                TrackedField::Status,
                TrackedField::Assignee,
                TrackedField::Status,
            ]
        );
        assert!(history.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn recent_returns_newest_first_with_limit() {
        let store = open_store().await;
        seed_project(&store, "alpha").await;
        let order = seed_order(&store, "alpha", "one").await;
        for to in [
            OrderStatus::InProgress,
            OrderStatus::Review,
            OrderStatus::Completed,
        ] {
            store
                .orders
                .set_status(&order.public_id, to, "runner", None)
                .await
                .unwrap();
        }

        let recent = store.audit.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].new_value.as_deref(), Some("completed"));
        assert_eq!(recent[1].new_value.as_deref(), Some("review"));
    }
}
