//! End-to-end live edits against running scripts.

use live_edit::edit::{EditRequest, PatchIssue, PatchOutcome, SourceVerification};
use live_edit::runtime::{ContextState, RunOutcome, ScriptId, Value};
use live_edit::{LiveEditError, LiveEditor, PatchabilityStatus, PlanReason};

fn load(editor: &mut LiveEditor, source: &str) -> ScriptId {
    editor
        .runtime_mut()
        .load_script("main.js", source)
        .unwrap()
}

fn call(editor: &mut LiveEditor, name: &str, args: Vec<Value>) -> String {
    match editor.runtime_mut().call_global(name, args).unwrap() {
        (_, RunOutcome::Completed(value)) => value.to_string(),
        (ctx, RunOutcome::Paused(_)) => panic!("{name} paused in {ctx}"),
    }
}

fn global(editor: &LiveEditor, name: &str) -> String {
    editor
        .runtime()
        .global(name)
        .map(Value::to_string)
        .unwrap_or_else(|| panic!("global {name} is not defined"))
}

#[test]
fn body_edit_of_idle_function() {
    let mut editor = LiveEditor::default();
    let script = load(&mut editor, "function f(){return 1;} f();");
    editor.runtime_mut().run_script(script).unwrap();

    let report = editor
        .edit_script(script, "function f(){return 2;} f();")
        .unwrap();

    assert_eq!(report.outcome, PatchOutcome::Success);
    assert_eq!(report.functions.len(), 1);
    let f = report.function("f").unwrap();
    assert!(f.directly_patchable);
    assert!(f.replaced);
    assert_eq!(f.status, PatchabilityStatus::Available);
    assert!(f.issues.is_empty());
    assert!(report.rerun_context.is_none());
    assert_eq!(call(&mut editor, "f", vec![]), "2");
}

#[test]
fn new_version_becomes_current() {
    let mut editor = LiveEditor::default();
    let script = load(&mut editor, "function f(){return 1;}");
    let before = editor.current_version(script).unwrap();

    let report = editor.edit_script(script, "function f(){return 3;}").unwrap();

    let after = editor.current_version(script).unwrap();
    assert_ne!(before, after);
    assert_eq!(report.new_version, Some(after));
    assert_eq!(
        &*editor.runtime().script(script).unwrap().current().source,
        "function f(){return 3;}"
    );
}

#[test]
fn parameter_change_while_paused_restarts_top_level() {
    let mut editor = LiveEditor::default();
    let script = load(
        &mut editor,
        "function f() { debugger; return 40; }\nvar r = f();\n",
    );
    let (ctx, outcome) = editor.runtime_mut().run_script(script).unwrap();
    assert!(matches!(outcome, RunOutcome::Paused(_)));

    let request = EditRequest::new(
        script,
        editor.current_version(script).unwrap(),
        "function f(x) { debugger; return x + 2; }\nvar r = f(40);\n",
    );
    let options = editor.default_options().with_drop(true);
    let report = editor.submit_edit(request, &options).unwrap();

    assert_eq!(report.outcome, PatchOutcome::Success);
    let f = report.function("f").unwrap();
    assert!(!f.directly_patchable);
    assert_eq!(f.reason, PlanReason::ParameterCountChanged);
    assert_eq!(f.status, PatchabilityStatus::ReplacedActiveStack);
    assert!(f.replaced);
    assert_ne!(f.new_record, Some(f.record));

    let restarted: Vec<_> = report.dropped_frames.iter().filter(|d| d.restarted).collect();
    assert_eq!(restarted.len(), 1);
    assert_eq!(restarted[0].depth, 0);
    assert_eq!(restarted[0].name, "<top-level>");
    assert!(report.dropped_frames.iter().any(|d| d.name == "f" && d.depth == 1));
    // the restarted frame runs the new top level, no second context
    assert!(report.rerun_context.is_none());

    // new f pauses at its own debugger statement before returning
    let outcome = editor.runtime_mut().resume(ctx).unwrap();
    assert!(matches!(outcome, RunOutcome::Paused(_)));
    let outcome = editor.runtime_mut().resume(ctx).unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(_)));
    assert_eq!(global(&editor, "r"), "42");
}

#[test]
fn invalid_source_changes_nothing() {
    let mut editor = LiveEditor::default();
    let script = load(&mut editor, "function f(){return 1;}");
    editor.runtime_mut().run_script(script).unwrap();
    let before = editor.current_version(script).unwrap();

    let report = editor.edit_script(script, "function f( { return 2; }").unwrap();

    assert_eq!(report.outcome, PatchOutcome::CompileError);
    assert!(report.compile_error.is_some());
    assert!(report.functions.is_empty());
    assert_eq!(report.new_version, None);
    assert_eq!(editor.current_version(script).unwrap(), before);
    assert_eq!(call(&mut editor, "f", vec![]), "1");
}

#[test]
fn active_function_without_drop_is_blocked_then_retried() {
    let mut editor = LiveEditor::default();
    let old = "function f() { debugger; return 1; } var r = f();";
    let new = "function f() { debugger; return 2; } var r = f();";
    let script = load(&mut editor, old);
    let (ctx, _) = editor.runtime_mut().run_script(script).unwrap();
    let before = editor.current_version(script).unwrap();

    let report = editor.edit_script(script, new).unwrap();

    assert_eq!(report.outcome, PatchOutcome::Blocked);
    let f = report.function("f").unwrap();
    assert_eq!(f.status, PatchabilityStatus::BlockedActiveStack);
    assert!(f.issues.contains(&PatchIssue::BlockedActivation));
    assert!(!f.replaced);
    assert!(report.dropped_frames.is_empty());
    assert_eq!(editor.current_version(script).unwrap(), before);

    // the paused activation finishes with the code it started with
    editor.runtime_mut().resume(ctx).unwrap();
    assert_eq!(global(&editor, "r"), "1");

    let report = editor.edit_script(script, new).unwrap();
    assert_eq!(report.outcome, PatchOutcome::Success);
    // f pauses at debugger again, resume to completion
    let (ctx, outcome) = editor.runtime_mut().call_global("f", vec![]).unwrap();
    assert!(matches!(outcome, RunOutcome::Paused(_)));
    match editor.runtime_mut().resume(ctx).unwrap() {
        RunOutcome::Completed(value) => assert_eq!(value.to_string(), "2"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn partial_success_marks_blocked_function_stale_and_retries_it() {
    let mut editor = LiveEditor::default();
    let script = load(
        &mut editor,
        "function f() { debugger; return 1; }\nfunction g() { return 1; }\nvar r = f();",
    );
    let new = "function f() { debugger; return 2; }\nfunction g() { return 2; }\nvar r = f();";
    let (ctx, _) = editor.runtime_mut().run_script(script).unwrap();

    let report = editor.edit_script(script, new).unwrap();

    assert_eq!(report.outcome, PatchOutcome::PartialSuccess);
    let f = report.function("f").unwrap();
    let g = report.function("g").unwrap();
    assert_eq!(f.status, PatchabilityStatus::BlockedActiveStack);
    assert!(!f.replaced);
    assert!(g.replaced);
    assert!(editor.runtime().function(f.record).unwrap().stale);
    assert_eq!(call(&mut editor, "g", vec![]), "2");

    editor.runtime_mut().resume(ctx).unwrap();
    assert_eq!(global(&editor, "r"), "1");

    // same text again: the stale record is retried
    let report = editor.edit_script(script, new).unwrap();
    assert_eq!(report.outcome, PatchOutcome::Success);
    assert!(report.chunks.is_empty());
    let f = report.function("f").unwrap();
    assert_eq!(f.reason, PlanReason::Retry);
    assert!(f.replaced);
    assert!(!editor.runtime().function(f.record).unwrap().stale);

    let report = editor.edit_script(script, new).unwrap();
    assert_eq!(report.outcome, PatchOutcome::NoChangesDetected);
}

#[test]
fn retry_links_nested_function_escalated_into_blocked_target() {
    let mut editor = LiveEditor::default();
    let script = load(
        &mut editor,
        "function p() { function g() { return 1; } debugger; return g(); }\n\
         function h() { return 1; }\nvar r = p();",
    );
    let new = "function p() { function g(x) { return 2; } debugger; return g(); }\n\
               function h() { return 2; }\nvar r = p();";
    let (ctx, _) = editor.runtime_mut().run_script(script).unwrap();

    let report = editor.edit_script(script, new).unwrap();
    assert_eq!(report.outcome, PatchOutcome::PartialSuccess);
    let p = report.function("p").unwrap();
    assert_eq!(p.status, PatchabilityStatus::BlockedActiveStack);
    let g = report.function("g").unwrap();
    assert!(!g.directly_patchable);
    assert_eq!(g.reason, PlanReason::ParameterCountChanged);
    assert!(!g.replaced);
    // the old g record is not moved onto the new descriptor
    let old_g = editor.runtime().function(g.record).unwrap();
    assert_eq!(old_g.param_count, 0);
    assert!(editor.runtime().function(p.record).unwrap().stale);
    assert_eq!(call(&mut editor, "h", vec![]), "2");

    editor.runtime_mut().resume(ctx).unwrap();
    assert_eq!(global(&editor, "r"), "1");

    let report = editor.edit_script(script, new).unwrap();
    assert_eq!(report.outcome, PatchOutcome::Success);
    let p = report.function("p").unwrap();
    assert_eq!(p.reason, PlanReason::Retry);
    assert!(p.replaced);

    let (ctx, outcome) = editor.runtime_mut().call_global("p", vec![]).unwrap();
    assert!(matches!(outcome, RunOutcome::Paused(_)));
    match editor.runtime_mut().resume(ctx).unwrap() {
        RunOutcome::Completed(value) => assert_eq!(value.to_string(), "2"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn activation_on_another_stack_blocks_and_refuses_drop() {
    let mut editor = LiveEditor::default();
    let script = load(
        &mut editor,
        "function f() { debugger; return 1; }\nfunction h() { debugger; }\nvar r = f();",
    );
    let (first, _) = editor.runtime_mut().run_script(script).unwrap();
    let (second, outcome) = editor.runtime_mut().call_global("h", vec![]).unwrap();
    assert!(matches!(outcome, RunOutcome::Paused(_)));
    assert_eq!(
        editor.runtime().context(first).unwrap().state,
        ContextState::Suspended
    );

    let request = EditRequest::new(
        script,
        editor.current_version(script).unwrap(),
        "function f() { debugger; return 2; }\nfunction h() { debugger; }\nvar r = f();",
    );
    let options = editor.default_options().with_drop(true).requesting(second);
    let report = editor.submit_edit(request, &options).unwrap();

    assert_eq!(report.outcome, PatchOutcome::Blocked);
    let f = report.function("f").unwrap();
    assert_eq!(f.status, PatchabilityStatus::BlockedOtherStack);
    assert!(f.issues.contains(&PatchIssue::UnsafeDrop));
    assert!(report.dropped_frames.is_empty());
    assert_eq!(editor.runtime().context(first).unwrap().frames.len(), 2);
}

#[test]
fn native_frame_between_activation_and_pause_blocks() {
    let mut editor = LiveEditor::default();
    let script = load(
        &mut editor,
        "function g() { debugger; }\nfunction f() { apply(g); return 1; }\nvar r = f();",
    );
    let (ctx, _) = editor.runtime_mut().run_script(script).unwrap();

    let request = EditRequest::new(
        script,
        editor.current_version(script).unwrap(),
        "function g() { debugger; }\nfunction f() { apply(g); return 2; }\nvar r = f();",
    );
    let options = editor.default_options().with_drop(true);
    let report = editor.submit_edit(request, &options).unwrap();

    assert_eq!(report.outcome, PatchOutcome::Blocked);
    let f = report.function("f").unwrap();
    assert_eq!(f.status, PatchabilityStatus::BlockedNativeFrame);
    assert!(f.issues.contains(&PatchIssue::UnsafeDrop));
    assert_eq!(editor.runtime().context(ctx).unwrap().frames.len(), 4);
}

#[test]
fn existing_closures_observe_new_code() {
    let mut editor = LiveEditor::default();
    let script = load(
        &mut editor,
        "function make(k) { return function () { return k; }; }\n\
         function other() { return 'x'; }\n\
         var a = make(1);\nvar b = make(2);\nvar keep = other;",
    );
    editor.runtime_mut().run_script(script).unwrap();
    assert_eq!(call(&mut editor, "a", vec![]), "1");
    let kept = editor.runtime().global("keep").cloned().unwrap();
    let other_record = editor.runtime().script(script).unwrap().records[3];

    let report = editor
        .edit_script(
            script,
            "function make(k) { return function () { return k * 10; }; }\n\
             function other() { return 'x'; }\n\
             var a = make(1);\nvar b = make(2);\nvar keep = other;",
        )
        .unwrap();

    assert_eq!(report.outcome, PatchOutcome::Success);
    let inner = report.function("<anonymous>").unwrap();
    assert!(inner.directly_patchable);
    assert_eq!(inner.new_record, Some(inner.record));
    assert!(report.function("make").is_none());
    assert!(report.function("other").is_none());

    assert_eq!(call(&mut editor, "a", vec![]), "10");
    assert_eq!(call(&mut editor, "b", vec![]), "20");
    assert_eq!(call(&mut editor, "other", vec![]), "x");
    // the untouched sibling keeps its record and its closure identity
    assert_eq!(editor.runtime().script(script).unwrap().records[3], other_record);
    assert!(kept.strict_equals(editor.runtime().global("other").unwrap()));
    assert!(kept.strict_equals(editor.runtime().global("keep").unwrap()));
    assert!(call(&mut editor, "make", vec![3.0.into()]).starts_with("[function"));
}

#[test]
fn top_level_edit_reruns_in_a_fresh_context() {
    let mut editor = LiveEditor::default();
    let script = load(&mut editor, "var x = 1;\nfunction f() { return x; }\n");
    editor.runtime_mut().run_script(script).unwrap();

    let report = editor
        .edit_script(script, "var x = 2;\nfunction f() { return x; }\n")
        .unwrap();

    assert_eq!(report.outcome, PatchOutcome::Success);
    let root = report.function("<top-level>").unwrap();
    assert!(root.replaced);
    let rerun = report.rerun_context.expect("top level re-ran");
    assert_eq!(
        editor.runtime().context(rerun).unwrap().state,
        ContextState::Finished
    );
    assert!(report.rerun_error.is_none());
    assert_eq!(call(&mut editor, "f", vec![]), "2");
}

#[test]
fn stale_version_is_rejected() {
    let mut editor = LiveEditor::default();
    let script = load(&mut editor, "function f(){return 1;}");
    editor.runtime_mut().run_script(script).unwrap();
    let first = editor.current_version(script).unwrap();
    editor.edit_script(script, "function f(){return 2;}").unwrap();

    let request = EditRequest::new(script, first, "function f(){return 3;}");
    let options = editor.default_options();
    let error = editor.submit_edit(request, &options).unwrap_err();

    assert!(matches!(error, LiveEditError::StaleVersion { .. }));
    assert_eq!(call(&mut editor, "f", vec![]), "2");
}

#[test]
fn mismatched_old_source_is_rejected() {
    let mut editor = LiveEditor::default();
    let script = load(&mut editor, "function f(){return 1;}");
    let version = editor.current_version(script).unwrap();

    let request = EditRequest::new(script, version, "function f(){return 2;}")
        .with_verification(SourceVerification::from_text("function f(){return 0;}"));
    let options = editor.default_options();
    let error = editor.submit_edit(request, &options).unwrap_err();
    assert!(matches!(error, LiveEditError::SourceMismatch { .. }));

    let request = EditRequest::new(script, version, "function f(){return 2;}")
        .with_verification(SourceVerification::from_text("function f(){return 1;}"));
    let report = editor.submit_edit(request, &options).unwrap();
    assert_eq!(report.outcome, PatchOutcome::Success);
}

#[test]
fn identical_source_reports_no_changes() {
    let mut editor = LiveEditor::default();
    let script = load(&mut editor, "function f(){return 1;}");
    let before = editor.current_version(script).unwrap();

    let report = editor.edit_script(script, "function f(){return 1;}").unwrap();

    assert_eq!(report.outcome, PatchOutcome::NoChangesDetected);
    assert!(report.functions.is_empty());
    assert_eq!(editor.current_version(script).unwrap(), before);
}

#[test]
fn dry_run_reports_without_mutating() {
    let mut editor = LiveEditor::default();
    let script = load(
        &mut editor,
        "function f() { debugger; return 1; }\nvar r = f();",
    );
    let (ctx, _) = editor.runtime_mut().run_script(script).unwrap();
    let before = editor.current_version(script).unwrap();

    let request = EditRequest::new(
        script,
        before,
        "function f() { debugger; return 2; }\nvar r = f();",
    );
    let options = editor.default_options().with_drop(true).dry_run(true);
    let report = editor.submit_edit(request, &options).unwrap();

    assert!(report.dry_run);
    assert_eq!(report.outcome, PatchOutcome::Success);
    assert_eq!(
        report.function("f").unwrap().status,
        PatchabilityStatus::ReplacedActiveStack
    );
    assert!(!report.dropped_frames.is_empty());
    assert_eq!(report.new_version, None);
    assert_eq!(editor.current_version(script).unwrap(), before);
    assert_eq!(editor.runtime().context(ctx).unwrap().frames.len(), 2);

    editor.runtime_mut().resume(ctx).unwrap();
    assert_eq!(global(&editor, "r"), "1");
}

#[test]
fn unknown_script_is_a_runtime_error() {
    let mut editor = LiveEditor::default();
    let error = editor.edit_script(ScriptId(99), "var x = 1;").unwrap_err();
    assert!(matches!(error, LiveEditError::Runtime(_)));
}
