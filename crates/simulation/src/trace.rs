//! Plain-text failure traces.

use distcheck_core::{Failure, TraceEntry};
use distcheck_types::NodeId;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Render a failure: the report, then each node's events on their own.
pub fn render(failure: &Failure) -> String {
    let mut out = failure.to_string();
    let nodes = failure
        .trace
        .iter()
        .map(|e| e.node.index() + 1)
        .max()
        .unwrap_or(0);
    for i in 0..nodes {
        let node = NodeId::from_index(i);
        let events: Vec<&TraceEntry> = failure.trace.iter().filter(|e| e.node == node).collect();
        if events.is_empty() {
            continue;
        }
        out.push_str(&format!("\n== {node} ==\n"));
        for entry in events {
            out.push_str(&format!("{}\n", entry.event));
        }
    }
    out
}

/// Write [`render`] output to `path`, replacing any existing file.
pub fn write_trace(path: &Path, failure: &Failure) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(render(failure).as_bytes())?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use distcheck_core::{Event, FailureKind};
    use distcheck_types::TaskId;
    use std::time::Duration;

    fn failure() -> Failure {
        Failure {
            kind: FailureKind::UnexpectedException {
                message: "boom".into(),
                tree_dump: None,
            },
            interleaving: vec![TaskId(0), TaskId(3)],
            trace: vec![
                TraceEntry {
                    node: NodeId(0),
                    event: Event::NodeCrashed,
                },
                TraceEntry {
                    node: NodeId(2),
                    event: Event::ScenarioFinished,
                },
            ],
        }
    }

    #[test]
    fn test_render_groups_events_by_node() {
        let text = render(&failure());
        assert!(text.contains("Unexpected exception: boom"));
        assert!(text.contains("== Node(0) ==\nCRASH\n"));
        assert!(text.contains("== Node(2) ==\nscenario finished\n"));
        assert!(!text.contains("== Node(1) =="));
    }

    #[test]
    fn test_deadlock_has_no_node_sections() {
        let deadlock = Failure {
            kind: FailureKind::Deadlock {
                timeout: Duration::from_secs(1),
            },
            interleaving: vec![],
            trace: vec![],
        };
        assert!(!render(&deadlock).contains("=="));
    }

    #[test]
    fn test_write_trace_to_file() {
        let path = std::env::temp_dir().join(format!("distcheck-trace-{}.txt", std::process::id()));
        write_trace(&path, &failure()).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, render(&failure()));
        let _ = std::fs::remove_file(&path);
    }
}
