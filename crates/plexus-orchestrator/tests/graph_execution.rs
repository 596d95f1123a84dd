//! End-to-end task graph execution over the in-process bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use plexus_bus::{Broker, Subscriber, SubscriberFeed};
use plexus_core::{
    AiBackend, AiError, BusConfig, CodeSummary, Envelope, GraphStatus, GraphStore, NodeState,
    NodeStatus, ObjectStore, SensorConfig, TaskGraph, TaskNode, Topics,
};
use plexus_orchestrator::{AgentOrchestrator, GraphPlanner, TelemetrySensor, ToolExecutor};
use plexus_store::{AppManifest, ManifestPolicyStore, MemoryGraphStore, MemoryObjectStore};

const APP: &str = "test-app";

struct StubAi;

#[async_trait]
impl AiBackend for StubAi {
    async fn generate_text(&self, prompt: &str) -> Result<String, AiError> {
        Ok(format!("echo: {prompt}"))
    }

    async fn generate_task_graph(&self, prompt: &str) -> Result<TaskGraph, AiError> {
        // Plans a single summarize node for the file named in the prompt.
        let path = prompt
            .split('\'')
            .nth(1)
            .ok_or_else(|| AiError::Upstream("no path in prompt".to_string()))?;
        Ok(TaskGraph::new(
            "",
            vec![node("sum1", "ai:summarize:code", &[("filePath", json!(path))], &[])],
        ))
    }

    async fn summarize_code(&self, source: &str) -> Result<CodeSummary, AiError> {
        Ok(CodeSummary {
            summary: format!("{} bytes of code", source.len()),
        })
    }
}

fn node(id: &str, tool: &str, input: &[(&str, Value)], deps: &[&str]) -> TaskNode {
    TaskNode {
        id: id.to_string(),
        tool: tool.to_string(),
        input: input
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect::<Map<String, Value>>(),
        depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
    }
}

fn graph(id: &str, nodes: Vec<TaskNode>) -> TaskGraph {
    TaskGraph::new(id, nodes)
}

struct Harness {
    broker: Broker,
    objects: Arc<MemoryObjectStore>,
    graphs: Arc<MemoryGraphStore>,
    probe: SubscriberFeed,
}

async fn setup() -> Harness {
    let broker = Broker::new(BusConfig::default());
    let objects = Arc::new(MemoryObjectStore::new());
    let graphs = Arc::new(MemoryGraphStore::new());
    let policy = Arc::new(ManifestPolicyStore::from_manifests([
        AppManifest {
            id: APP.to_string(),
            permissions: vec![
                "filesystem_read".to_string(),
                "filesystem_write".to_string(),
                "vm_run".to_string(),
            ],
        },
        AppManifest {
            id: "telemetry-sensor".to_string(),
            permissions: vec!["filesystem_read".to_string()],
        },
    ]));
    let ai: Arc<dyn AiBackend> = Arc::new(StubAi);

    // Probe subscribes before any component publishes.
    let (probe_handle, probe) = Subscriber::channel(512);
    for topic in [
        Topics::GRAPH_STARTED,
        Topics::GRAPH_COMPLETED,
        Topics::GRAPH_FAILED,
        Topics::NODE_STARTED,
        Topics::NODE_COMPLETED,
        Topics::NODE_FAILED,
        Topics::EXECUTE_NODE,
        Topics::VM_CREATE,
    ] {
        broker
            .topic(topic)
            .await
            .unwrap()
            .subscribe(probe_handle.clone())
            .await
            .unwrap();
    }

    ToolExecutor::new(broker.clone(), objects.clone(), ai.clone(), policy.clone())
        .start()
        .await
        .unwrap();
    AgentOrchestrator::new(broker.clone(), graphs.clone())
        .start()
        .await
        .unwrap();
    GraphPlanner::new(broker.clone(), ai).start().await.unwrap();
    TelemetrySensor::new(broker.clone(), SensorConfig::default())
        .start()
        .await
        .unwrap();

    Harness {
        broker,
        objects,
        graphs,
        probe,
    }
}

async fn publish_created(broker: &Broker, graph: &TaskGraph) {
    let envelope = Envelope::new(Topics::GRAPH_CREATED, "agent_event")
        .with_payload(json!({"taskGraph": graph}))
        .with_meta(json!({"appId": APP}));
    broker.publish(envelope).await.unwrap();
}

/// Wait for the next envelope on `topic`, collecting everything else.
async fn wait_for(probe: &mut SubscriberFeed, topic: &str, seen: &mut Vec<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = probe.next().await.expect("probe closed");
            if envelope.topic == topic {
                return envelope;
            }
            seen.push(envelope);
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {topic}"))
}

#[tokio::test]
async fn dag_happy_path_resolves_templates_between_nodes() {
    let mut h = setup().await;
    h.objects.write("/f", b"hello").await.unwrap();

    let g = graph(
        "g1",
        vec![
            node("s1", "vfs:read", &[("path", json!("/f"))], &[]),
            node(
                "s2",
                "vfs:write",
                &[("path", json!("/g")), ("content", json!("{{s1.output}}"))],
                &["s1"],
            ),
        ],
    );
    publish_created(&h.broker, &g).await;

    let mut seen = Vec::new();
    let completed = wait_for(&mut h.probe, Topics::GRAPH_COMPLETED, &mut seen).await;
    assert_eq!(completed.payload["graphId"], json!("g1"));

    // The second dispatch carried the resolved content, not the template.
    let dispatches: Vec<&Envelope> = seen
        .iter()
        .filter(|e| e.topic == Topics::EXECUTE_NODE)
        .collect();
    assert_eq!(dispatches.len(), 2);
    let s2 = dispatches
        .iter()
        .find(|e| e.payload["nodeId"] == json!("s2"))
        .expect("s2 dispatched");
    assert_eq!(s2.payload["input"]["content"], json!("hello"));
    assert_eq!(s2.meta["graphId"], json!("g1"));
    assert_eq!(s2.meta["appId"], json!(APP));

    // The write actually happened.
    assert_eq!(h.objects.read("/g").await.unwrap(), b"hello");

    // Persisted terminal state holds the invariants.
    let stored = h.graphs.get("g1").await.unwrap();
    assert_eq!(stored.status, GraphStatus::Completed);
    assert!(stored.finished_at.is_some());
    assert!(stored.all_nodes_completed());
    assert_eq!(stored.node_results["s1"]["output"], json!("hello"));
    assert_eq!(stored.node_results["s2"]["output"], json!("ok"));
}

#[tokio::test]
async fn missing_template_reference_fails_the_graph() {
    let mut h = setup().await;
    h.objects.write("/f", b"hello").await.unwrap();

    let g = graph(
        "g2",
        vec![
            node("s1", "vfs:read", &[("path", json!("/f"))], &[]),
            node(
                "s2",
                "vfs:write",
                &[("path", json!("/g")), ("content", json!("{{s99.output}}"))],
                &["s1"],
            ),
        ],
    );
    publish_created(&h.broker, &g).await;

    let mut seen = Vec::new();
    let failed = wait_for(&mut h.probe, Topics::GRAPH_FAILED, &mut seen).await;
    assert_eq!(failed.payload["graphId"], json!("g2"));

    // The resolution failure surfaced as a real node-failed event naming
    // the missing reference.
    let node_failed = seen
        .iter()
        .find(|e| e.topic == Topics::NODE_FAILED && e.payload["nodeId"] == json!("s2"))
        .expect("node-failed event for s2");
    assert!(node_failed.payload["error"]
        .as_str()
        .unwrap()
        .contains("s99"));

    let stored = h.graphs.get("g2").await.unwrap();
    assert_eq!(stored.status, GraphStatus::Failed);
    assert_eq!(
        stored.error.as_deref(),
        Some("Execution failed at node s2")
    );
    assert!(stored.node_states["s2"]
        .error
        .as_deref()
        .unwrap()
        .contains("s99"));
    // s2 was never dispatched.
    assert!(!seen
        .iter()
        .any(|e| e.topic == Topics::EXECUTE_NODE && e.payload["nodeId"] == json!("s2")));
}

#[tokio::test]
async fn unknown_tool_fails_the_node_and_the_graph() {
    let mut h = setup().await;
    let g = graph("g3", vec![node("s1", "wat", &[], &[])]);
    publish_created(&h.broker, &g).await;

    let mut seen = Vec::new();
    let node_failed = wait_for(&mut h.probe, Topics::NODE_FAILED, &mut seen).await;
    assert_eq!(node_failed.payload["error"], json!("unknown tool: wat"));

    let graph_failed = wait_for(&mut h.probe, Topics::GRAPH_FAILED, &mut seen).await;
    assert_eq!(graph_failed.payload["graphId"], json!("g3"));
}

#[tokio::test]
async fn missing_permission_fails_the_node() {
    let mut h = setup().await;
    h.objects.write("/f", b"hello").await.unwrap();

    let g = graph("g4", vec![node("s1", "vfs:read", &[("path", json!("/f"))], &[])]);
    let envelope = Envelope::new(Topics::GRAPH_CREATED, "agent_event")
        .with_payload(json!({"taskGraph": g}))
        .with_meta(json!({"appId": "locked-app"}));
    h.broker.publish(envelope).await.unwrap();

    let mut seen = Vec::new();
    let node_failed = wait_for(&mut h.probe, Topics::NODE_FAILED, &mut seen).await;
    let error = node_failed.payload["error"].as_str().unwrap();
    assert!(error.contains("permission denied"), "got: {error}");
    wait_for(&mut h.probe, Topics::GRAPH_FAILED, &mut seen).await;
}

#[tokio::test]
async fn duplicate_completion_events_do_not_redispatch() {
    let mut h = setup().await;
    h.objects.write("/f", b"hello").await.unwrap();

    let g = graph("g5", vec![node("s1", "vfs:read", &[("path", json!("/f"))], &[])]);
    publish_created(&h.broker, &g).await;

    let mut seen = Vec::new();
    wait_for(&mut h.probe, Topics::GRAPH_COMPLETED, &mut seen).await;

    // Replay a completion for a node that is no longer running.
    let stale = Envelope::new(Topics::NODE_COMPLETED, "executor_event").with_payload(json!({
        "graphId": "g5",
        "nodeId": "s1",
        "result": {"output": "stale"}
    }));
    h.broker.publish(stale).await.unwrap();

    // Run a second graph through; the serial orchestrator mailbox guarantees
    // the stale event was processed before this one finishes.
    let g6 = graph("g6", vec![node("s1", "vfs:read", &[("path", json!("/f"))], &[])]);
    publish_created(&h.broker, &g6).await;
    wait_for(&mut h.probe, Topics::GRAPH_COMPLETED, &mut seen).await;

    let g5_dispatches = seen
        .iter()
        .filter(|e| e.topic == Topics::EXECUTE_NODE && e.payload["graphId"] == json!("g5"))
        .count();
    assert_eq!(g5_dispatches, 1);
    let stored = h.graphs.get("g5").await.unwrap();
    assert_eq!(stored.node_results["s1"]["output"], json!("hello"));
}

#[tokio::test]
async fn parallel_branches_both_run_before_join() {
    let mut h = setup().await;
    h.objects.write("/a", b"left").await.unwrap();
    h.objects.write("/b", b"right").await.unwrap();

    let g = graph(
        "g7",
        vec![
            node("left", "vfs:read", &[("path", json!("/a"))], &[]),
            node("right", "vfs:read", &[("path", json!("/b"))], &[]),
            node(
                "join",
                "vfs:write",
                &[("path", json!("/out")), ("content", json!("{{left.output}}"))],
                &["left", "right"],
            ),
        ],
    );
    publish_created(&h.broker, &g).await;

    let mut seen = Vec::new();
    wait_for(&mut h.probe, Topics::GRAPH_COMPLETED, &mut seen).await;

    let stored = h.graphs.get("g7").await.unwrap();
    assert!(stored.all_nodes_completed());
    // the join only started after both dependencies finished
    let join_started = stored.node_states["join"].started_at.unwrap();
    for dep in ["left", "right"] {
        assert!(stored.node_states[dep].finished_at.unwrap() <= join_started);
    }
    assert_eq!(h.objects.read("/out").await.unwrap(), b"left");
}

#[tokio::test]
async fn cyclic_graph_is_rejected_at_registration() {
    let mut h = setup().await;
    let g = graph(
        "g8",
        vec![node("a", "vfs:read", &[], &["b"]), node("b", "vfs:read", &[], &["a"])],
    );
    publish_created(&h.broker, &g).await;

    let mut seen = Vec::new();
    let failed = wait_for(&mut h.probe, Topics::GRAPH_FAILED, &mut seen).await;
    assert_eq!(failed.payload["graphId"], json!("g8"));
    assert!(!seen.iter().any(|e| e.topic == Topics::EXECUTE_NODE));
}

#[tokio::test]
async fn vm_run_republishes_create_and_completes_immediately() {
    let mut h = setup().await;
    let g = graph(
        "g9",
        vec![node("s1", "vm:run", &[("wasmBase64", json!("AGFzbQ=="))], &[])],
    );
    publish_created(&h.broker, &g).await;

    let mut seen = Vec::new();
    wait_for(&mut h.probe, Topics::GRAPH_COMPLETED, &mut seen).await;
    let already_seen = seen.iter().find(|e| e.topic == Topics::VM_CREATE).cloned();
    let create = match already_seen {
        Some(envelope) => envelope,
        None => wait_for(&mut h.probe, Topics::VM_CREATE, &mut seen).await,
    };
    assert_eq!(create.payload["wasmBase64"], json!("AGFzbQ=="));

    let stored = h.graphs.get("g9").await.unwrap();
    assert_eq!(stored.node_results["s1"]["output"], json!("started"));
}

#[tokio::test]
async fn rehydration_resets_running_nodes_and_resumes() {
    let broker = Broker::new(BusConfig::default());
    let objects = Arc::new(MemoryObjectStore::new());
    objects.write("/f", b"hello").await.unwrap();
    let graphs = Arc::new(MemoryGraphStore::new());
    let policy = Arc::new(ManifestPolicyStore::from_manifests([AppManifest {
        id: APP.to_string(),
        permissions: vec!["filesystem_read".to_string()],
    }]));

    // A graph left mid-flight by a crash: the node was dispatched but no
    // terminal event ever arrived.
    let mut stranded = graph("g10", vec![node("s1", "vfs:read", &[("path", json!("/f"))], &[])]);
    stranded.app_id = Some(APP.to_string());
    stranded.status = GraphStatus::Running;
    stranded.node_states.insert(
        "s1".to_string(),
        NodeState {
            status: NodeStatus::Running,
            started_at: Some(chrono::Utc::now()),
            finished_at: None,
            error: None,
        },
    );
    graphs.put(&stranded).await.unwrap();

    let (probe_handle, mut probe) = Subscriber::channel(64);
    broker
        .topic(Topics::GRAPH_COMPLETED)
        .await
        .unwrap()
        .subscribe(probe_handle.clone())
        .await
        .unwrap();

    ToolExecutor::new(broker.clone(), objects, Arc::new(StubAi), policy)
        .start()
        .await
        .unwrap();
    AgentOrchestrator::new(broker.clone(), graphs.clone())
        .start()
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let envelope = probe.next().await.expect("probe closed");
            if envelope.topic == Topics::GRAPH_COMPLETED
                && envelope.payload["graphId"] == json!("g10")
            {
                break;
            }
        }
    })
    .await
    .expect("graph did not complete after rehydration");

    let stored = graphs.get("g10").await.unwrap();
    assert_eq!(stored.status, GraphStatus::Completed);
    assert_eq!(stored.node_results["s1"]["output"], json!("hello"));
}

#[tokio::test]
async fn telemetry_read_triggers_autonomous_summarization_graph() {
    let mut h = setup().await;
    h.objects.write("/src/lib.rs", b"pub fn x() {}").await.unwrap();

    let telemetry = Envelope::new(Topics::TELEMETRY_VFS, "sensor_event").with_payload(json!({
        "type": "vfs",
        "timestamp": chrono::Utc::now(),
        "payload": {"operation": "read", "path": "/src/lib.rs", "success": true}
    }));
    h.broker.publish(telemetry).await.unwrap();

    let mut seen = Vec::new();
    let completed = wait_for(&mut h.probe, Topics::GRAPH_COMPLETED, &mut seen).await;
    let graph_id = completed.payload["graphId"].as_str().unwrap().to_string();

    let stored = h.graphs.get(&graph_id).await.unwrap();
    assert_eq!(
        stored.node_results["sum1"]["output"],
        json!("13 bytes of code")
    );
}
