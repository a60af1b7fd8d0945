//! JSON round-trip tests for schema types
//!
//! These tests verify that the wire types serialize to JSON and come back
//! unchanged, ensuring API compatibility and proper serde configuration.

use crate::*;
use schemars::schema_for;

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to test JSON round-trip for any serializable type
    fn test_json_roundtrip<T>(original: &T)
    where
        T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
    {
        let json = serde_json::to_string(original).expect("Failed to serialize to JSON");
        let deserialized: T = serde_json::from_str(&json).expect("Failed to deserialize from JSON");
        assert_eq!(
            *original, deserialized,
            "Round-trip failed for JSON: {}",
            json
        );
    }

    #[test]
    fn test_process_descriptor_roundtrip() {
        let descriptor = ProcessDescriptor {
            pid: 4242,
            name: "node.exe".to_string(),
            cmdline: "node server.js --port 3000".to_string(),
            cmdline_truncated: false,
            cwd: Some("C:\\projects\\web".to_string()),
            parent_pid: Some(900),
            created: Some(current_timestamp()),
            memory_bytes: 150 * 1024 * 1024,
            memory_mb: memory_mb(150 * 1024 * 1024),
            memory_human: format_memory_human(150 * 1024 * 1024),
            cpu_percent: Some(2.5),
            threads: Some(12),
            children: Some(vec![PidName {
                pid: 4243,
                name: "node.exe".to_string(),
            }]),
            children_count: Some(1),
            protected: false,
            protection_reason: ProtectionReason::NotProtected,
            user_spawned: true,
            category: ProcessCategory::ScriptRuntime,
            warning: None,
        };
        test_json_roundtrip(&descriptor);
    }

    #[test]
    fn test_minimal_descriptor_roundtrip() {
        // The Instant-tier shape: pid and name only.
        let descriptor = ProcessDescriptor {
            pid: 8,
            name: "chrome.exe".to_string(),
            cmdline: String::new(),
            cmdline_truncated: false,
            cwd: None,
            parent_pid: None,
            created: None,
            memory_bytes: 0,
            memory_mb: 0.0,
            memory_human: String::new(),
            cpu_percent: None,
            threads: None,
            children: None,
            children_count: None,
            protected: false,
            protection_reason: ProtectionReason::NotProtected,
            user_spawned: false,
            category: ProcessCategory::Browser,
            warning: None,
        };
        test_json_roundtrip(&descriptor);
    }

    #[test]
    fn test_protection_verdict_roundtrip() {
        for reason in [
            ProtectionReason::NotProtected,
            ProtectionReason::PatternMatch,
            ProtectionReason::ParentProtected,
            ProtectionReason::ChildProtected,
            ProtectionReason::ScriptContent,
            ProtectionReason::SystemCritical,
            ProtectionReason::Unknown,
        ] {
            test_json_roundtrip(&ProtectionVerdict::new(reason));
        }
    }

    #[test]
    fn test_port_entry_roundtrip() {
        let entry = PortEntry {
            port: 8000,
            service: "Django/FastAPI Server".to_string(),
            status: PortStatus::Active,
            process: Some(PortOwner {
                pid: 1234,
                name: "python.exe".to_string(),
                has_children: true,
                total_processes: 4,
            }),
            extra_processes: vec![1235, 1236],
        };
        test_json_roundtrip(&entry);
        test_json_roundtrip(&PortEntry::inactive(5173, "Vite Dev Server"));
    }

    #[test]
    fn test_spawn_record_roundtrip() {
        let record = SpawnRecord {
            pid: 5555,
            wrapper_pid: Some(5554),
            command: "npm run dev".to_string(),
            cwd: Some("C:\\projects\\web".to_string()),
            started_at: current_timestamp(),
            uptime_seconds: 42,
            status: SpawnStatus::Running,
            has_group: true,
        };
        test_json_roundtrip(&record);

        let exited = SpawnRecord {
            status: SpawnStatus::Exited { code: Some(0) },
            has_group: false,
            ..record
        };
        test_json_roundtrip(&exited);
    }

    #[test]
    fn test_tool_request_roundtrips() {
        let requests = vec![
            ToolRequest::FindProcess {
                name: "chrome".to_string(),
                mode: DetailTier::Instant,
                include_args: true,
                show_full_cmdline: false,
            },
            ToolRequest::KillProcess {
                pid: 77,
                force: true,
                override_user_spawn: false,
                dry_run: true,
            },
            ToolRequest::KillProcessTree {
                pid: 77,
                force: false,
                dry_run: false,
            },
            ToolRequest::CheckPorts { port: Some(8080) },
            ToolRequest::DevStatus,
            ToolRequest::ServerStatus,
            ToolRequest::FindProcessByPort { port: 3000 },
            ToolRequest::CleanupUserProcesses { confirm: true },
            ToolRequest::ExecuteCommand {
                command: "npm run dev".to_string(),
                cwd: None,
                background: true,
            },
            ToolRequest::ListAllowed,
        ];
        for req in &requests {
            test_json_roundtrip(req);
        }
    }

    #[test]
    fn test_error_body_roundtrip() {
        let body = ErrorBody::new(
            ErrorKind::UserSpawnedGuard,
            "retry with override=true, or use kill_process_tree",
            "this process was started by execute_command",
        )
        .with_detail(serde_json::json!({"pid": 99}));
        test_json_roundtrip(&body);
    }

    #[test]
    fn test_schema_generation() {
        // Schemas must generate for every wire type a client consumes.
        let _ = schema_for!(ProcessDescriptor);
        let _ = schema_for!(ProtectionVerdict);
        let _ = schema_for!(PortEntry);
        let _ = schema_for!(SpawnRecord);
        let _ = schema_for!(ToolRequest);
        let _ = schema_for!(ErrorBody);
        let _ = schema_for!(ToolResponse);
    }
}
