//! Assembly of the agent data plane.
//!
//! An [`Agent`] owns the circular observation buffer, the asset store, the
//! change-signaler registry, a loopback pipeline for agent-generated
//! observations, and one ingest pipeline per adapter. Queries go through
//! the thin facade in [`query`], reads and writes meet in the sink, and a
//! [`StalenessMonitor`] marks silent sources unavailable.

#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod agent;
mod config;
mod query;
mod sink;
mod staleness;

pub use agent::{Adapter, Agent, ConnectionStatus};
pub use config::AgentConfig;
pub use query::{AssetMeta, WindowMeta};
pub use staleness::StalenessMonitor;

#[cfg(test)]
mod tests {
    use super::*;
    use agent_time::{MockProvider, Time};
    use assert_matches::assert_matches;
    use data_types::{Category, Component, DataItem, Device, DeviceModel, FilterSet, Representation};
    use observation::{Level, Payload, Value};
    use observation_store::WaitOutcome;
    use std::sync::Arc;
    use std::time::Duration;

    const START: &str = "2021-01-22T12:00:00Z";

    fn item(id: &str, type_name: &str, category: Category, repr: Representation) -> Arc<DataItem> {
        Arc::new(DataItem::new(id, type_name, category, repr))
    }

    fn model() -> Arc<DeviceModel> {
        let device = Device::new("000", "LinuxCNC");
        device.add_component(Component::new(
            "axes",
            Some("Axes".into()),
            vec![
                Arc::new(
                    DataItem::new("x1", "POSITION", Category::Sample, Representation::Value)
                        .with_name("Xpos"),
                ),
                Arc::new(
                    DataItem::new("y1", "POSITION", Category::Sample, Representation::Value)
                        .with_name("Ypos"),
                ),
                Arc::new(
                    DataItem::new("z1", "POSITION", Category::Sample, Representation::Value)
                        .with_name("Zpos"),
                ),
                item("c1", "LOAD", Category::Condition, Representation::Value),
                item("vars", "VARIABLE", Category::Event, Representation::DataSet),
                item("wpo", "WORK_OFFSET", Category::Event, Representation::Table),
                Arc::new(
                    DataItem::new("e1", "EXECUTION", Category::Event, Representation::Value)
                        .with_name("exec"),
                ),
            ],
        ));

        let agent_device = Device::new("agent-uuid", "Agent");
        agent_device.add_component(Component::new(
            "agent",
            None,
            vec![
                item("ac1", "ASSET_CHANGED", Category::Event, Representation::Value),
                item("ar1", "ASSET_REMOVED", Category::Event, Representation::Value),
                item(
                    "acount",
                    "ASSET_COUNT",
                    Category::Event,
                    Representation::DataSet,
                ),
                item(
                    "adapter1_connection_status",
                    "CONNECTION_STATUS",
                    Category::Event,
                    Representation::Value,
                ),
            ],
        ));

        let model = DeviceModel::new();
        model.add_device(device).unwrap();
        model.add_device(agent_device).unwrap();
        Arc::new(model)
    }

    fn config() -> AgentConfig {
        AgentConfig {
            buffer_size_exp: 3,
            checkpoint_frequency: 4,
            max_assets: 4,
            filter_duplicates: false,
            ignore_timestamps: false,
            upcase_data_item_value: false,
            conversion_required: false,
            legacy_timeout: Duration::from_secs(600),
            ..Default::default()
        }
    }

    fn agent_with(config: AgentConfig) -> (Arc<Agent>, Arc<MockProvider>) {
        let clock = Arc::new(MockProvider::new(Time::from_rfc3339(START).unwrap()));
        let agent = Agent::new(config, model(), Arc::clone(&clock) as _);
        (agent, clock)
    }

    fn agent() -> (Arc<Agent>, Arc<MockProvider>) {
        agent_with(config())
    }

    fn filter(ids: &[&str]) -> FilterSet {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn basic_ingest_and_current() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        adapter.process_line("2021-01-22T12:33:45.123Z|Xpos|100.0");

        let (checkpoint, meta) = agent.current(Some(&filter(&["x1"])), None).unwrap();
        assert_eq!(meta.last_sequence, 1);
        assert_eq!(meta.next_sequence, 2);
        assert_eq!(meta.buffer_size, 8);

        let observation = checkpoint.observation("x1").unwrap();
        assert_eq!(observation.sequence(), 1);
        assert_eq!(observation.value(), Some(&Value::Double(100.0)));
        assert_eq!(
            observation.timestamp().to_rfc3339(),
            "2021-01-22T12:33:45.123Z"
        );
    }

    #[test]
    fn condition_chain_and_clear() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        adapter.process_line("2021-01-22T12:33:45Z|c1|WARNING|CODE1|HIGH|Over...");
        adapter.process_line("2021-01-22T12:33:46Z|c1|WARNING|CODE2|HIGH|Over...");
        adapter.process_line("2021-01-22T12:33:47Z|c1|NORMAL|CODE1||");

        let (checkpoint, _) = agent.current(None, None).unwrap();
        let head = checkpoint.observation("c1").unwrap();
        assert_eq!(head.chain_len(), 1);

        let condition = head.condition().unwrap();
        assert_eq!(condition.level, Level::Warning);
        assert_eq!(condition.code(), Some("CODE2"));

        // the checkpoint reports exactly one active condition
        let listed = checkpoint.observations(Some(&filter(&["c1"])));
        assert_eq!(listed.len(), 1);
    }

    #[test]
    fn data_set_merge_and_removal() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        adapter.process_line("2021-01-22T12:33:45Z|vars|a=1 b=2 c=3 d=4");
        adapter.process_line("2021-01-22T12:33:46Z|vars|c e=6 a");

        let (checkpoint, _) = agent.current(None, None).unwrap();
        let set = checkpoint.observation("vars").unwrap().data_set().unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.value("b"), Some(&Value::Integer(2)));
        assert_eq!(set.value("d"), Some(&Value::Integer(4)));
        assert_eq!(set.value("e"), Some(&Value::Integer(6)));
    }

    #[test]
    fn data_set_reset_trigger() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        adapter.process_line("2021-01-22T12:33:45Z|vars|a=1 b=2 c=3");
        adapter.process_line("2021-01-22T12:33:46Z|vars|:MANUAL d=10");

        let (checkpoint, _) = agent.current(None, None).unwrap();
        let observation = checkpoint.observation("vars").unwrap();
        assert_eq!(observation.reset_triggered(), Some("MANUAL"));
        let set = observation.data_set().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.value("d"), Some(&Value::Integer(10)));
    }

    #[test]
    fn checkpoint_reconstruction_across_periodic_boundary() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        // ten observations round-robin over three data items
        let names = ["Xpos", "Ypos", "Zpos"];
        for i in 0..10 {
            adapter.process_line(&format!(
                "2021-01-22T12:33:{:02}Z|{}|{}.0",
                10 + i,
                names[i % 3],
                i
            ));
        }

        let (at_five, meta) = agent.current(None, Some(5)).unwrap();
        assert_eq!(meta.first_sequence, 3);

        // at sequence 5: Xpos last seen at 4, Ypos at 5, Zpos at 3
        assert_eq!(at_five.observation("x1").unwrap().sequence(), 4);
        assert_eq!(at_five.observation("y1").unwrap().sequence(), 5);
        assert_eq!(at_five.observation("z1").unwrap().sequence(), 3);

        // and it must agree with stepping one observation past at=4
        let (at_four, _) = agent.current(None, Some(4)).unwrap();
        let mut stepped = at_four;
        let (range, _) = agent.sample(1, Some(5), None).unwrap();
        stepped.add(&range.observations[0]);
        for observation in stepped.observations(None) {
            assert_eq!(
                at_five
                    .observation(observation.data_item_id())
                    .unwrap()
                    .sequence(),
                observation.sequence()
            );
        }
    }

    #[test]
    fn current_below_window_is_out_of_range() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");
        for i in 0..12 {
            adapter.process_line(&format!("2021-01-22T12:34:00Z|Xpos|{i}"));
        }

        // capacity 8: window is [5, 12]
        assert!(agent.current(None, Some(5)).is_ok());
        assert_matches!(
            agent.current(None, Some(4)),
            Err(observation_store::Error::OutOfRange { sequence: 4, .. })
        );
        assert_matches!(
            agent.current(None, Some(13)),
            Err(observation_store::Error::OutOfRange { sequence: 13, .. })
        );
    }

    #[test]
    fn sample_reads_a_window_slice() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");
        adapter.process_line("2021-01-22T12:33:45Z|Xpos|1|Ypos|2|Zpos|3");

        let (range, meta) = agent.sample(2, Some(1), None).unwrap();
        assert_eq!(meta.last_sequence, 3);
        assert_eq!(range.observations.len(), 2);
        assert_eq!(range.next_sequence, 3);
        assert!(!range.end_of_buffer);

        // a from outside the window is refused
        for i in 0..12 {
            adapter.process_line(&format!("2021-01-22T12:34:00Z|Xpos|{i}"));
        }
        assert_matches!(
            agent.sample(10, Some(2), None),
            Err(observation_store::Error::OutOfRange { .. })
        );
    }

    #[test]
    fn duplicate_filter_commits_one_sequence_for_n_repeats() {
        let (agent, _) = agent_with(AgentConfig {
            filter_duplicates: true,
            ..config()
        });
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        for _ in 0..5 {
            adapter.process_line("2021-01-22T12:33:45.123Z|Xpos|100.0");
        }
        let (_, meta) = agent.current(None, None).unwrap();
        assert_eq!(meta.last_sequence, 1);

        adapter.process_line("2021-01-22T12:33:46Z|Xpos|101.0");
        let (_, meta) = agent.current(None, None).unwrap();
        assert_eq!(meta.last_sequence, 2);
    }

    #[test]
    fn asset_ingest_overflow_and_hash_stability() {
        let (agent, clock) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        for id in ["P1", "P2", "P3", "P4", "P5"] {
            adapter.process_line(&format!(
                "2021-02-01T12:00:00Z|@ASSET@|{id}|Part|<Part assetId='{id}'>X</Part>"
            ));
        }

        let (_, meta) = agent.assets();
        assert_eq!(meta.asset_count, 4);
        assert!(agent.asset("P1").is_none());
        assert!(agent.asset("P2").is_some());

        // re-upsert P2 with the identical document
        let before = agent.asset("P2").unwrap();
        clock.inc(Duration::from_secs(60));
        adapter.process_line(
            "2023-02-01T12:00:00Z|@ASSET@|P2|Part|<Part assetId='P2'>X</Part>",
        );
        let after = agent.asset("P2").unwrap();
        assert_eq!(before.hash(), after.hash());
        assert!(after.timestamp() > before.timestamp());
        let (_, meta) = agent.assets();
        assert_eq!(meta.asset_count, 4);

        // P2 moved to the back of the eviction order, so P3 goes next
        adapter.process_line("2023-02-01T12:01:00Z|@ASSET@|P6|Part|<Part assetId='P6'>X</Part>");
        assert!(agent.asset("P2").is_some());
        assert!(agent.asset("P3").is_none());
    }

    #[test]
    fn multiline_asset_blocks() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        adapter.process_line("2021-02-01T12:00:00Z|@ASSET@|P1|Part|--multiline--AAAA");
        adapter.process_line("<Part assetId='P1'>");
        adapter.process_line("  <PartXXX>TEST 1</PartXXX>");
        adapter.process_line("</Part>");
        adapter.process_line("--multiline--AAAA");

        let asset = agent.asset("P1").unwrap();
        assert!(asset.document().contains("<PartXXX>TEST 1</PartXXX>"));
        assert_eq!(
            asset.timestamp(),
            Time::from_rfc3339("2021-02-01T12:00:00Z").unwrap()
        );
    }

    #[test]
    fn asset_changes_are_observed_with_hash_and_counts() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        adapter.process_line("2021-02-01T12:00:00Z|@ASSET@|P1|Part|<Part assetId='P1'/>");

        let (checkpoint, _) = agent.current(None, None).unwrap();
        let changed = checkpoint.observation("ac1").unwrap();
        let hash = agent.asset("P1").unwrap().hash().to_string();
        assert_matches!(changed.payload(), Payload::AssetEvent(event) => {
            assert_eq!(event.asset_id, "P1");
            assert_eq!(event.asset_type, "Part");
            assert_eq!(event.hash.as_deref(), Some(hash.as_str()));
        });

        let counts = checkpoint.observation("acount").unwrap().data_set().unwrap();
        assert_eq!(counts.value("Part"), Some(&Value::Integer(1)));

        // removal emits the removed event and zeroes the count
        adapter.process_line("2021-02-01T12:10:00Z|@REMOVE_ASSET@|P1");
        let (checkpoint, _) = agent.current(None, None).unwrap();
        let removed = checkpoint.observation("ar1").unwrap();
        assert_matches!(removed.payload(), Payload::AssetEvent(event) => {
            assert_eq!(event.asset_id, "P1");
        });
        let counts = checkpoint.observation("acount").unwrap().data_set().unwrap();
        assert!(!counts.contains_key("Part"));
    }

    #[test]
    fn observers_wake_on_commit() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");
        let observer = agent.observer();

        adapter.process_line("2021-01-22T12:33:45Z|Xpos|1");
        assert_eq!(
            observer.wait_for(Duration::from_millis(10)),
            WaitOutcome::Signaled(1)
        );

        observer.reset();
        assert_eq!(
            observer.wait_for(Duration::from_millis(1)),
            WaitOutcome::TimedOut
        );

        adapter.process_line("2021-01-22T12:33:46Z|Xpos|2");
        assert_eq!(
            observer.wait_for(Duration::from_millis(10)),
            WaitOutcome::Signaled(2)
        );
    }

    #[test]
    fn stop_cancels_observers() {
        let (agent, _) = agent();
        let observer = agent.observer();
        agent.stop();
        assert_eq!(
            observer.wait_for(Duration::from_millis(1)),
            WaitOutcome::Closed
        );
    }

    #[test]
    fn connection_close_marks_items_unavailable() {
        let (agent, _) = agent();
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");

        adapter.set_connection_status(ConnectionStatus::Established);
        adapter.process_line("2021-01-22T12:33:45Z|Xpos|100.0|exec|ACTIVE");
        adapter.set_connection_status(ConnectionStatus::Closed);

        let (checkpoint, _) = agent.current(None, None).unwrap();
        assert!(checkpoint.observation("x1").unwrap().is_unavailable());
        assert!(checkpoint.observation("e1").unwrap().is_unavailable());

        // the agent device observed the transition
        let status = checkpoint.observation("adapter1_connection_status").unwrap();
        assert_eq!(status.value(), Some(&Value::Text("CLOSED".into())));
    }

    #[test]
    fn silent_sources_go_stale_after_legacy_timeout() {
        let (agent, clock) = agent_with(AgentConfig {
            legacy_timeout: Duration::from_secs(30),
            ..config()
        });
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");
        adapter.process_line("2021-01-22T12:33:45Z|Xpos|100.0");

        // quiet, but not for long enough
        clock.inc(Duration::from_secs(10));
        assert_eq!(agent.sweep_stale_sources(), 0);

        clock.inc(Duration::from_secs(30));
        assert_eq!(agent.sweep_stale_sources(), 1);
        // a second sweep does not re-mark
        assert_eq!(agent.sweep_stale_sources(), 0);

        let (checkpoint, _) = agent.current(None, None).unwrap();
        assert!(checkpoint.observation("x1").unwrap().is_unavailable());

        // hearing from the adapter again rearms the sweep
        adapter.process_line("2021-01-22T12:40:00Z|Xpos|101.0");
        assert!(!agent
            .current(None, None)
            .unwrap()
            .0
            .observation("x1")
            .unwrap()
            .is_unavailable());
    }

    #[tokio::test]
    async fn staleness_monitor_sweeps_in_the_background() {
        let (agent, clock) = agent_with(AgentConfig {
            legacy_timeout: Duration::from_secs(30),
            ..config()
        });
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");
        adapter.process_line("2021-01-22T12:33:45Z|Xpos|100.0");
        clock.inc(Duration::from_secs(60));

        let monitor = StalenessMonitor::spawn(Arc::clone(&agent), Duration::from_millis(5));

        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_secs(5);
        loop {
            let (checkpoint, _) = agent.current(None, None).unwrap();
            if checkpoint
                .observation("x1")
                .map_or(false, |o| o.is_unavailable())
            {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "sweep never ran");
            tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
        }

        monitor.stop().await;
    }

    #[test]
    fn device_uuid_updates_respect_preserve_uuid() {
        let (agent, _) = agent_with(AgentConfig {
            preserve_uuid: true,
            ..config()
        });
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");
        adapter.update_device_uuid("new-uuid");
        assert_eq!(agent.model().device_by_name("LinuxCNC").unwrap().uuid(), "000");

        let (agent, _) = agent_with(AgentConfig {
            preserve_uuid: false,
            ..config()
        });
        let adapter = agent.add_adapter("adapter1", "LinuxCNC");
        adapter.update_device_uuid("new-uuid");
        assert_eq!(
            agent.model().device_by_name("LinuxCNC").unwrap().uuid(),
            "new-uuid"
        );
    }
}
