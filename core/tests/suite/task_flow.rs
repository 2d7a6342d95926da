use std::fs;

use shellbox_core::Engine;
use shellbox_core::EngineConfig;
use shellbox_core::ToolError;
use shellbox_protocol::ContextSave;
use shellbox_protocol::FileEdit;
use shellbox_protocol::InitType;
use shellbox_protocol::Initialize;
use shellbox_protocol::ModeName;
use shellbox_protocol::ToolCall;
use tempfile::TempDir;

fn test_engine(store: &TempDir) -> Engine {
    let config = EngineConfig {
        task_store_root: Some(store.path().to_path_buf()),
        ..Default::default()
    };
    Engine::new(config).unwrap()
}

fn init_args(workspace: &std::path::Path) -> Initialize {
    Initialize {
        init_type: InitType::FirstCall,
        any_workspace_path: workspace.display().to_string(),
        initial_files_to_read: Vec::new(),
        task_id_to_resume: String::new(),
        mode_name: ModeName::Wcgw,
        code_writer_config: None,
    }
}

#[test]
fn context_save_then_resume_restores_context() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    fs::create_dir_all(workspace.path().join("src")).unwrap();
    fs::write(workspace.path().join("src/lib.rs"), "pub fn f() -> i32 { 1 }\n").unwrap();

    let mut engine = test_engine(&store);
    engine.initialize(init_args(workspace.path())).unwrap();

    let out = engine
        .dispatch(ToolCall::ContextSave(ContextSave {
            id: "migration-task".to_string(),
            project_root_path: workspace.path().display().to_string(),
            description: "Bump f to return 2; tests not yet updated.".to_string(),
            relevant_file_globs: vec!["src/**/*.rs".to_string()],
        }))
        .unwrap();
    assert!(out.contains("Saved task migration-task"), "out: {out}");
    assert!(out.contains("1 file(s)"), "out: {out}");

    // A fresh session resumes the task: workspace and ledger come back.
    let mut fresh = test_engine(&store);
    let mut resume = init_args(workspace.path());
    resume.task_id_to_resume = "migration-task".to_string();
    let out = fresh.initialize(resume).unwrap();
    assert!(out.contains("Bump f to return 2"), "out: {out}");

    // Bundled files are write-eligible without another read.
    let lib = workspace.path().join("src/lib.rs").canonicalize().unwrap();
    let out = fresh
        .dispatch(ToolCall::FileEdit(FileEdit {
            file_path: lib.display().to_string(),
            file_edit_using_search_replace_blocks:
                "<<<<<<< SEARCH\npub fn f() -> i32 { 1 }\n=======\npub fn f() -> i32 { 2 }\n>>>>>>> REPLACE\n"
                    .to_string(),
        }))
        .unwrap();
    assert!(out.contains("Edited successfully"), "out: {out}");
    assert_eq!(
        fs::read_to_string(&lib).unwrap(),
        "pub fn f() -> i32 { 2 }\n"
    );
}

#[test]
fn resume_of_unknown_task_fails() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    let mut resume = init_args(workspace.path());
    resume.task_id_to_resume = "never-saved".to_string();
    let err = engine.initialize(resume).unwrap_err();
    assert!(matches!(err, ToolError::NoSuchTask { .. }), "err: {err:?}");
}

#[test]
fn save_with_relative_root_is_rejected() {
    let workspace = TempDir::new().unwrap();
    let store = TempDir::new().unwrap();
    let mut engine = test_engine(&store);
    engine.initialize(init_args(workspace.path())).unwrap();
    let err = engine
        .dispatch(ToolCall::ContextSave(ContextSave {
            id: "t".to_string(),
            project_root_path: "relative/path".to_string(),
            description: String::new(),
            relevant_file_globs: Vec::new(),
        }))
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidArgument(_)), "err: {err:?}");
}
