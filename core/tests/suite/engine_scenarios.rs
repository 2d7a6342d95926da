use std::fs;
use std::path::Path;

use shellbox_core::Engine;
use shellbox_core::EngineConfig;
use shellbox_core::ToolError;
use shellbox_protocol::AllowedItems;
use shellbox_protocol::BashAction;
use shellbox_protocol::BashCommand;
use shellbox_protocol::CodeWriterConfig;
use shellbox_protocol::FileEdit;
use shellbox_protocol::InitType;
use shellbox_protocol::Initialize;
use shellbox_protocol::ModeName;
use shellbox_protocol::ReadFiles;
use shellbox_protocol::ToolCall;
use shellbox_protocol::WriteIfEmpty;
use tempfile::TempDir;

fn test_engine(store: &TempDir) -> Engine {
    let config = EngineConfig {
        task_store_root: Some(store.path().to_path_buf()),
        ..Default::default()
    };
    Engine::new(config).unwrap()
}

fn init_args(init_type: InitType, workspace: &Path, mode_name: ModeName) -> Initialize {
    Initialize {
        init_type,
        any_workspace_path: workspace.display().to_string(),
        initial_files_to_read: Vec::new(),
        task_id_to_resume: String::new(),
        mode_name,
        code_writer_config: None,
    }
}

fn edit_block(search: &str, replace: &str) -> String {
    format!("<<<<<<< SEARCH\n{search}\n=======\n{replace}\n>>>>>>> REPLACE\n")
}

fn command(engine: &mut Engine, cmd: &str, wait: f64) -> Result<String, ToolError> {
    engine.dispatch(ToolCall::BashCommand(BashCommand {
        action_json: BashAction::Command {
            command: cmd.to_string(),
        },
        wait_for_seconds: Some(wait),
    }))
}

#[test]
fn s1_gated_edit_roundtrip() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);

    let out = engine
        .initialize(init_args(InitType::FirstCall, workspace.path(), ModeName::Wcgw))
        .unwrap();
    assert!(out.contains("Workspace:"), "out: {out}");
    assert!(out.contains("# Repository structure"), "out: {out}");

    let file = workspace.path().join("a.txt");
    let out = engine
        .dispatch(ToolCall::WriteIfEmpty(WriteIfEmpty {
            file_path: file.display().to_string(),
            file_content: "hello\n".to_string(),
        }))
        .unwrap();
    assert!(out.contains("Created"), "out: {out}");

    let out = engine
        .dispatch(ToolCall::FileEdit(FileEdit {
            file_path: file.display().to_string(),
            file_edit_using_search_replace_blocks: edit_block("hello", "HELLO"),
        }))
        .unwrap();
    assert!(out.contains("Edited successfully"), "out: {out}");

    let out = engine
        .dispatch(ToolCall::ReadFiles(ReadFiles {
            file_paths: vec![file.display().to_string()],
            show_line_numbers_reason: None,
        }))
        .unwrap();
    assert!(out.contains("HELLO"), "out: {out}");
    assert_eq!(fs::read(&file).unwrap(), b"HELLO\n");
}

#[test]
fn s2_unread_file_refusal_then_success() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    engine
        .initialize(init_args(InitType::FirstCall, workspace.path(), ModeName::Wcgw))
        .unwrap();

    let file = workspace.path().join("a.txt");
    fs::write(&file, "existing content\n").unwrap();

    let err = engine
        .dispatch(ToolCall::FileEdit(FileEdit {
            file_path: file.display().to_string(),
            file_edit_using_search_replace_blocks: edit_block("existing content", "changed"),
        }))
        .unwrap_err();
    assert!(matches!(err, ToolError::NotRead { .. }), "err: {err:?}");
    assert_eq!(fs::read(&file).unwrap(), b"existing content\n");

    engine
        .dispatch(ToolCall::ReadFiles(ReadFiles {
            file_paths: vec![file.display().to_string()],
            show_line_numbers_reason: None,
        }))
        .unwrap();
    let out = engine
        .dispatch(ToolCall::FileEdit(FileEdit {
            file_path: file.display().to_string(),
            file_edit_using_search_replace_blocks: edit_block("existing content", "changed"),
        }))
        .unwrap();
    assert!(out.contains("Edited successfully"), "out: {out}");
    assert_eq!(fs::read(&file).unwrap(), b"changed\n");
}

#[test]
fn s3_architect_denies_mutation_allows_inspection() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    engine
        .initialize(init_args(InitType::FirstCall, workspace.path(), ModeName::Wcgw))
        .unwrap();
    engine
        .initialize(init_args(
            InitType::UserAskedModeChange,
            workspace.path(),
            ModeName::Architect,
        ))
        .unwrap();

    let err = command(&mut engine, "rm -rf /", 2.0).unwrap_err();
    assert!(matches!(err, ToolError::Forbidden { .. }), "err: {err:?}");

    let out = command(&mut engine, "ls", 5.0).unwrap();
    assert!(out.contains("status = process exited with code 0"), "out: {out}");

    // Denied writes leave the disk byte-identical.
    let probe = workspace.path().join("probe.txt");
    fs::write(&probe, "untouched\n").unwrap();
    let err = engine
        .dispatch(ToolCall::WriteIfEmpty(WriteIfEmpty {
            file_path: workspace.path().join("new.txt").display().to_string(),
            file_content: "nope\n".to_string(),
        }))
        .unwrap_err();
    assert!(matches!(err, ToolError::Forbidden { .. }));
    assert!(!workspace.path().join("new.txt").exists());
    assert_eq!(fs::read(&probe).unwrap(), b"untouched\n");
}

#[test]
fn s4_fuzzy_match_preserves_indentation() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    engine
        .initialize(init_args(InitType::FirstCall, workspace.path(), ModeName::Wcgw))
        .unwrap();

    let file = workspace.path().join("code.py");
    fs::write(&file, "    def f():\n        return 1\n").unwrap();
    engine
        .dispatch(ToolCall::ReadFiles(ReadFiles {
            file_paths: vec![file.display().to_string()],
            show_line_numbers_reason: None,
        }))
        .unwrap();

    let out = engine
        .dispatch(ToolCall::FileEdit(FileEdit {
            file_path: file.display().to_string(),
            file_edit_using_search_replace_blocks: edit_block(
                "def f():\n    return 1",
                "def f():\n    return 2",
            ),
        }))
        .unwrap();
    assert!(out.contains("indentation"), "out: {out}");
    assert_eq!(
        fs::read_to_string(&file).unwrap(),
        "    def f():\n        return 2\n"
    );
}

#[test]
fn s5_streaming_command_partial_then_complete() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    engine
        .initialize(init_args(InitType::FirstCall, workspace.path(), ModeName::Wcgw))
        .unwrap();

    let out = command(
        &mut engine,
        "for i in 1 2 3; do echo $i; sleep 1; done",
        1.0,
    )
    .unwrap();
    assert!(out.contains("status = still running"), "out: {out}");

    let out = engine
        .dispatch(ToolCall::BashCommand(BashCommand {
            action_json: BashAction::StatusCheck { status_check: true },
            wait_for_seconds: Some(8.0),
        }))
        .unwrap();
    assert!(out.contains('3'), "out: {out}");
    assert!(out.contains("status = process exited with code 0"), "out: {out}");
}

#[test]
fn s6_reset_shell_interrupts_and_recovers() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    engine
        .initialize(init_args(InitType::FirstCall, workspace.path(), ModeName::Wcgw))
        .unwrap();

    let out = command(&mut engine, "sleep 100", 0.5).unwrap();
    assert!(out.contains("status = still running"), "out: {out}");

    engine
        .initialize(init_args(InitType::ResetShell, workspace.path(), ModeName::Wcgw))
        .unwrap();

    let out = command(&mut engine, "echo ok", 5.0).unwrap();
    assert!(out.contains("ok"), "out: {out}");
    assert!(out.contains("status = process exited with code 0"), "out: {out}");
}

#[test]
fn code_writer_globs_enforced_end_to_end() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    fs::create_dir_all(workspace.path().join("src")).unwrap();
    let mut engine = test_engine(&store);

    let mut args = init_args(InitType::FirstCall, workspace.path(), ModeName::CodeWriter);
    args.code_writer_config = Some(CodeWriterConfig {
        allowed_globs: AllowedItems::List(vec!["src/**/*.rs".to_string()]),
        allowed_commands: AllowedItems::All,
    });
    engine.initialize(args).unwrap();

    let allowed = workspace.path().join("src/lib.rs");
    engine
        .dispatch(ToolCall::WriteIfEmpty(WriteIfEmpty {
            file_path: allowed.display().to_string(),
            file_content: "pub fn f() {}\n".to_string(),
        }))
        .unwrap();

    let denied = workspace.path().join("Cargo.toml");
    let err = engine
        .dispatch(ToolCall::WriteIfEmpty(WriteIfEmpty {
            file_path: denied.display().to_string(),
            file_content: "[package]\n".to_string(),
        }))
        .unwrap_err();
    assert!(matches!(err, ToolError::Forbidden { .. }), "err: {err:?}");
    assert!(!denied.exists());
}

#[test]
fn initialize_with_file_path_uses_parent_and_reads_it() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let file = workspace.path().join("notes.md");
    fs::write(&file, "remember the milk\n").unwrap();

    let mut engine = test_engine(&store);
    let out = engine
        .initialize(init_args(InitType::FirstCall, &file, ModeName::Wcgw))
        .unwrap();
    assert!(out.contains("remember the milk"), "out: {out}");
    let expected = workspace.path().canonicalize().unwrap();
    assert_eq!(engine.workspace().unwrap(), expected.as_path());
}

#[test]
fn tools_before_initialize_are_refused() {
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    let err = command(&mut engine, "echo hi", 1.0).unwrap_err();
    assert!(matches!(err, ToolError::InvalidArgument(_)), "err: {err:?}");
}

#[test]
fn busy_shell_reports_screen_snapshot() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    engine
        .initialize(init_args(InitType::FirstCall, workspace.path(), ModeName::Wcgw))
        .unwrap();

    let _ = command(&mut engine, "sleep 2", 0.0).unwrap();
    let err = command(&mut engine, "echo blocked", 0.0).unwrap_err();
    assert!(matches!(err, ToolError::Busy { .. }), "err: {err:?}");

    // Drain the sleeper.
    let out = engine
        .dispatch(ToolCall::BashCommand(BashCommand {
            action_json: BashAction::StatusCheck { status_check: true },
            wait_for_seconds: Some(6.0),
        }))
        .unwrap();
    assert!(out.contains("exited"), "out: {out}");
}
