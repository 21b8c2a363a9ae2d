//! Child agent launcher and mission supervisor.
//!
//! Spawns the configured agent command with the mission prompt, pumps its
//! stdout line by line into a bounded feedback queue, and enforces the
//! wall-clock mission cap. Queue overflow drops the oldest `text` events;
//! `tool_use` and `turn` events anchor the timeline and are never dropped.

use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    intercom_config::AgentLauncherConfig,
    intercom_protocol::{
        FeedbackEvent, FeedbackItem, MissionPollReply, MissionStartReply, MissionStartRequest,
        MissionStatus,
    },
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        sync::{Mutex, Notify},
    },
    tracing::{debug, info, warn},
};

use crate::{error::DaemonError, feedback::ParsedLine};

const FEEDBACK_QUEUE_CAPACITY: usize = 256;
const MAX_OUTPUT_BYTES: usize = 200 * 1024;

/// Daemon-local record of a launched mission.
#[derive(Debug, Clone)]
pub struct DaemonMission {
    pub mission_id: String,
    pub hub_mission_id: String,
    pub status: MissionStatus,
    pub status_label: Option<String>,
    pub output: String,
    pub feedback: Vec<FeedbackItem>,
    pub ignored_events: u64,
    pub started_at: DateTime<Utc>,
}

impl DaemonMission {
    pub fn poll_reply(&self, feedback_since: u64) -> MissionPollReply {
        MissionPollReply {
            mission_id: self.mission_id.clone(),
            status: self.status,
            status_label: self.status_label.clone(),
            output: Some(self.output.clone()),
            feedback: self
                .feedback
                .iter()
                .filter(|f| f.cursor > feedback_since)
                .cloned()
                .collect(),
        }
    }
}

/// Bounded producer/consumer queue between the stdout pump and the mission
/// log writer.
struct FeedbackQueue {
    events: std::sync::Mutex<VecDeque<FeedbackEvent>>,
    notify: Notify,
    closed: std::sync::atomic::AtomicBool,
}

impl FeedbackQueue {
    fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn push(&self, event: FeedbackEvent) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= FEEDBACK_QUEUE_CAPACITY {
            // Shed prose first; never an anchor event.
            if let Some(pos) = events
                .iter()
                .position(|e| matches!(e, FeedbackEvent::Text { .. }))
            {
                events.remove(pos);
                debug!("feedback queue full, dropped oldest text event");
            }
        }
        events.push_back(event);
        drop(events);
        self.notify.notify_one();
    }

    fn pop_all(&self) -> Vec<FeedbackEvent> {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.drain(..).collect()
    }

    fn close(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

type MissionMap = Arc<Mutex<HashMap<String, DaemonMission>>>;

/// Owner of all daemon-local missions and their child processes.
pub struct MissionRunner {
    config: AgentLauncherConfig,
    missions: MissionMap,
}

impl MissionRunner {
    pub fn new(config: AgentLauncherConfig) -> Self {
        Self {
            config,
            missions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn poll(&self, mission_id: &str, feedback_since: u64) -> Option<MissionPollReply> {
        self.missions
            .lock()
            .await
            .get(mission_id)
            .map(|m| m.poll_reply(feedback_since))
    }

    /// Launch a child agent for a mission.
    pub async fn start(&self, req: &MissionStartRequest) -> Result<MissionStartReply, DaemonError> {
        let cwd = self.resolve_cwd(req.cwd.as_deref())?;
        let mission_id = uuid::Uuid::new_v4().simple().to_string();

        self.missions.lock().await.insert(
            mission_id.clone(),
            DaemonMission {
                mission_id: mission_id.clone(),
                hub_mission_id: req.mission_id.clone(),
                status: MissionStatus::Running,
                status_label: None,
                output: String::new(),
                feedback: Vec::new(),
                ignored_events: 0,
                started_at: Utc::now(),
            },
        );

        let mut cmd = tokio::process::Command::new(&self.config.default_command);
        cmd.args(&self.config.default_args)
            .arg(&req.prompt)
            .current_dir(&cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.fail(&mission_id, &format!("spawn failed: {e}"), "spawn_failed")
                    .await;
                return Err(DaemonError::Internal(format!(
                    "failed to spawn {}: {e}",
                    self.config.default_command
                )));
            },
        };

        info!(
            mission_id,
            hub_mission_id = %req.mission_id,
            command = %self.config.default_command,
            cwd = %cwd.display(),
            "mission child spawned"
        );

        let queue = Arc::new(FeedbackQueue::new());

        // Producer: stdout pump. Closes the queue at EOF, after the last
        // buffered event has been parsed.
        match child.stdout.take() {
            Some(stdout) => {
                tokio::spawn(pump_stdout(
                    stdout,
                    Arc::clone(&queue),
                    Arc::clone(&self.missions),
                    mission_id.clone(),
                ));
            },
            None => queue.close(),
        }
        // Stderr is captured into the output tail for debugging.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stderr(
                stderr,
                Arc::clone(&self.missions),
                mission_id.clone(),
            ));
        }

        // Writer: drains the queue into the mission's feedback log.
        tokio::spawn(feedback_writer(
            Arc::clone(&queue),
            Arc::clone(&self.missions),
            mission_id.clone(),
        ));

        // Supervisor: exit status and wall-clock cap.
        let missions = Arc::clone(&self.missions);
        let max = Duration::from_secs(self.config.max_mission_duration_secs);
        let supervisor_id = mission_id.clone();
        tokio::spawn(async move {
            let outcome = tokio::time::timeout(max, child.wait()).await;
            let mut missions = missions.lock().await;
            let Some(mission) = missions.get_mut(&supervisor_id) else {
                return;
            };
            match outcome {
                Ok(Ok(status)) if status.success() => {
                    mission.status = MissionStatus::Completed;
                    info!(mission_id = %supervisor_id, "mission completed");
                },
                Ok(Ok(status)) => {
                    mission.status = MissionStatus::Failed;
                    mission.status_label =
                        Some(format!("exit {}", status.code().unwrap_or(-1)));
                    warn!(mission_id = %supervisor_id, ?status, "mission child failed");
                },
                Ok(Err(e)) => {
                    mission.status = MissionStatus::Failed;
                    mission.status_label = Some("wait_failed".into());
                    warn!(mission_id = %supervisor_id, error = %e, "mission wait failed");
                },
                Err(_) => {
                    // Wall-clock cap: kill the child, keep partial logs.
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    mission.status = MissionStatus::Failed;
                    mission.status_label = Some("timeout".into());
                    warn!(mission_id = %supervisor_id, "mission killed after wall-clock cap");
                },
            }
        });

        Ok(MissionStartReply {
            mission_id,
            status: MissionStatus::Running,
        })
    }

    fn resolve_cwd(&self, requested: Option<&str>) -> Result<PathBuf, DaemonError> {
        let allowed = &self.config.allowed_paths;
        let cwd = match requested {
            Some(c) => PathBuf::from(c),
            None => allowed
                .first()
                .cloned()
                .ok_or_else(|| DaemonError::PathNotAllowed("no allowed paths configured".into()))?,
        };

        if allowed.iter().any(|root| cwd.starts_with(root)) {
            Ok(cwd)
        } else {
            Err(DaemonError::PathNotAllowed(cwd.display().to_string()))
        }
    }

    async fn fail(&self, mission_id: &str, message: &str, label: &str) {
        if let Some(mission) = self.missions.lock().await.get_mut(mission_id) {
            mission.status = MissionStatus::Failed;
            mission.status_label = Some(label.to_string());
            mission.output.push_str(message);
            mission.output.push('\n');
        }
    }
}

async fn pump_stdout(
    stdout: tokio::process::ChildStdout,
    queue: Arc<FeedbackQueue>,
    missions: MissionMap,
    mission_id: String,
) {
    let mut lines = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        append_output(&missions, &mission_id, &line).await;
        match crate::feedback::parse_line(&line) {
            ParsedLine::Text(text) => queue.push(FeedbackEvent::Text { text }),
            ParsedLine::ToolUse { tool, summary } => {
                queue.push(FeedbackEvent::ToolUse { tool, summary });
            },
            // The turn counter is assigned by the writer.
            ParsedLine::Turn => queue.push(FeedbackEvent::Turn { turn: 0 }),
            ParsedLine::Other => {
                if let Some(m) = missions.lock().await.get_mut(&mission_id) {
                    m.ignored_events += 1;
                }
            },
            ParsedLine::NotAnEvent => {},
        }
    }
    queue.close();
    debug!(mission_id, "stdout pump finished");
}

async fn pump_stderr(
    stderr: tokio::process::ChildStderr,
    missions: MissionMap,
    mission_id: String,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        append_output(&missions, &mission_id, &line).await;
    }
}

async fn append_output(missions: &MissionMap, mission_id: &str, line: &str) {
    if let Some(mission) = missions.lock().await.get_mut(mission_id) {
        if mission.output.len() < MAX_OUTPUT_BYTES {
            mission.output.push_str(line);
            mission.output.push('\n');
        } else if !mission.output.ends_with("[output truncated]\n") {
            mission.output.push_str("... [output truncated]\n");
        }
    }
}

async fn feedback_writer(queue: Arc<FeedbackQueue>, missions: MissionMap, mission_id: String) {
    let mut turns: u32 = 0;
    loop {
        let events = queue.pop_all();
        if !events.is_empty() {
            let mut missions = missions.lock().await;
            if let Some(mission) = missions.get_mut(&mission_id) {
                for event in events {
                    let event = match event {
                        FeedbackEvent::Turn { .. } => {
                            turns += 1;
                            FeedbackEvent::Turn { turn: turns }
                        },
                        other => other,
                    };
                    let cursor = mission.feedback.len() as u64 + 1;
                    mission.feedback.push(FeedbackItem { cursor, event });
                }
            }
        } else if queue.is_closed() {
            break;
        }
        if !queue.is_closed() {
            queue.notify.notified().await;
        }
    }
    debug!(mission_id, "feedback writer finished");
}

/// Lexical allowed-path check, shared with tests.
pub fn path_allowed(cwd: &Path, allowed: &[PathBuf]) -> bool {
    allowed.iter().any(|root| cwd.starts_with(root))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn runner(allowed: Vec<PathBuf>) -> MissionRunner {
        MissionRunner::new(AgentLauncherConfig {
            default_command: "true".into(),
            default_args: Vec::new(),
            allowed_paths: allowed,
            max_mission_duration_secs: 5,
        })
    }

    fn start_req(cwd: Option<&str>) -> MissionStartRequest {
        MissionStartRequest {
            mission_id: "hub-m-1".into(),
            from_agent: "a/home".parse().unwrap(),
            project: "p".into(),
            prompt: "list disks".into(),
            cwd: cwd.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_cwd_outside_allowed_paths_is_refused() {
        let r = runner(vec![PathBuf::from("/home/u")]);
        let err = r.start(&start_req(Some("/tmp/x"))).await.unwrap_err();
        assert!(matches!(err, DaemonError::PathNotAllowed(_)));
        // No mission record leaks a child process for a refused launch.
        assert!(r.missions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_allowed_paths_refuses_everything() {
        let r = runner(Vec::new());
        let err = r.start(&start_req(None)).await.unwrap_err();
        assert!(matches!(err, DaemonError::PathNotAllowed(_)));
    }

    #[test]
    fn test_path_allowed_is_prefix_based() {
        let allowed = vec![PathBuf::from("/home/u")];
        assert!(path_allowed(Path::new("/home/u/proj"), &allowed));
        assert!(path_allowed(Path::new("/home/u"), &allowed));
        assert!(!path_allowed(Path::new("/home/uvw"), &allowed));
        assert!(!path_allowed(Path::new("/tmp/x"), &allowed));
    }

    #[tokio::test]
    async fn test_queue_drops_oldest_text_but_keeps_anchors() {
        let queue = FeedbackQueue::new();
        queue.push(FeedbackEvent::ToolUse {
            tool: "Read".into(),
            summary: "a.md".into(),
        });
        for i in 0..FEEDBACK_QUEUE_CAPACITY + 10 {
            queue.push(FeedbackEvent::Text {
                text: format!("t{i}"),
            });
        }

        let events = queue.pop_all();
        // The tool_use anchor survived the overflow.
        assert!(matches!(events[0], FeedbackEvent::ToolUse { .. }));
        assert_eq!(events.len(), FEEDBACK_QUEUE_CAPACITY);
        // The oldest text events were the ones shed.
        assert!(matches!(
            &events[1],
            FeedbackEvent::Text { text } if text != "t0"
        ));
    }

    #[tokio::test]
    async fn test_mission_runs_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let r = MissionRunner::new(AgentLauncherConfig {
            default_command: "sh".into(),
            default_args: vec![
                "-c".into(),
                concat!(
                    r#"echo '{"type":"tool_use","tool":"Read","input":{"file":"a.md"}}'; "#,
                    r#"echo '{"type":"text","text":"done"}'; "#,
                    r#"echo '{"type":"turn"}'"#,
                )
                .into(),
                "--".into(),
            ],
            allowed_paths: vec![dir.path().to_path_buf()],
            max_mission_duration_secs: 30,
        });

        let reply = r.start(&start_req(None)).await.unwrap();
        assert_eq!(reply.status, MissionStatus::Running);

        // Wait for the child to finish and the writer to drain.
        let mut status = MissionStatus::Running;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let poll = r.poll(&reply.mission_id, 0).await.unwrap();
            status = poll.status;
            if status.is_terminal() && poll.feedback.len() == 3 {
                break;
            }
        }
        assert_eq!(status, MissionStatus::Completed);

        let poll = r.poll(&reply.mission_id, 0).await.unwrap();
        assert_eq!(poll.feedback.len(), 3);
        assert_eq!(poll.feedback[0].cursor, 1);
        assert_eq!(poll.feedback[1].cursor, 2);
        assert_eq!(
            poll.feedback[1].event,
            FeedbackEvent::Text { text: "done".into() }
        );
        assert_eq!(poll.feedback[2].event, FeedbackEvent::Turn { turn: 1 });

        // Incremental polling resumes after the cursor.
        let tail = r.poll(&reply.mission_id, 1).await.unwrap();
        assert_eq!(tail.feedback.len(), 2);
        assert_eq!(tail.feedback[0].cursor, 2);
    }

    #[tokio::test]
    async fn test_wall_clock_cap_kills_child() {
        let dir = tempfile::tempdir().unwrap();
        let r = MissionRunner::new(AgentLauncherConfig {
            default_command: "sh".into(),
            default_args: vec![
                "-c".into(),
                r#"echo '{"type":"text","text":"started"}'; sleep 60"#.into(),
                "--".into(),
            ],
            allowed_paths: vec![dir.path().to_path_buf()],
            max_mission_duration_secs: 1,
        });

        let reply = r.start(&start_req(None)).await.unwrap();
        let mut poll = r.poll(&reply.mission_id, 0).await.unwrap();
        for _ in 0..100 {
            if poll.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
            poll = r.poll(&reply.mission_id, 0).await.unwrap();
        }
        assert_eq!(poll.status, MissionStatus::Failed);
        assert_eq!(poll.status_label.as_deref(), Some("timeout"));
        // Partial feedback is preserved.
        assert_eq!(poll.feedback.len(), 1);
    }
}
