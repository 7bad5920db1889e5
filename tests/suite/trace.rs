use std::fs::write;
use std::sync::Arc;

use callsym::__private::FakeModule;
use callsym::__private::FakeProvider;
use callsym::__private::FakeTraceSource;
use callsym::ErrorKind;
use callsym::Resolution;
use callsym::ResolveOpts;
use callsym::StackResolver;

use tempfile::tempdir;
use tempfile::TempDir;

use test_log::test;


fn resolver() -> StackResolver {
    let provider = FakeProvider::new().module(
        "sqldk",
        FakeModule::new()
            .func("SOS_Scheduler::Switch", 0x40600, 0x100)
            .func("SOS_Task::Param::Execute", 0x1000, 0x200),
    );
    StackResolver::builder()
        .set_max_workers(2)
        .build(Arc::new(provider))
}

/// Write two trace files, recording three call stacks, two of which
/// are identical.
fn traces() -> TempDir {
    let dir = tempdir().unwrap();
    let () = write(
        dir.path().join("first.xel"),
        "sqldk+0x40609\nsqldk+0x1001\n\nsqldk+0x1002\n",
    )
    .unwrap();
    let () = write(dir.path().join("second.xel"), "sqldk+0x40609\nsqldk+0x1001\n").unwrap();
    dir
}


/// Check that call stacks recorded in event traces can be resolved as
/// a histogram.
#[test]
fn resolve_bucketized_traces() {
    let dir = traces();
    let files = [dir.path().join("first.xel"), dir.path().join("second.xel")];
    let source = FakeTraceSource::new();

    let resolution = resolver()
        .resolve_traces(&source, &files, true, &ResolveOpts::default())
        .unwrap();
    let expected = "\
Slot_0 [count:2]
sqldk!SOS_Scheduler::Switch+9
sqldk!SOS_Task::Param::Execute+1

Slot_1 [count:1]
sqldk!SOS_Task::Param::Execute+2
";
    assert_eq!(resolution, Resolution::Complete(expected.to_string()));
    assert_eq!(source.files(), 2);
}

/// Check that call stacks recorded in event traces can be resolved as
/// a stream of events.
#[test]
fn resolve_trace_events() {
    let dir = traces();
    let files = [dir.path().join("first.xel"), dir.path().join("second.xel")];
    let source = FakeTraceSource::new();

    let resolution = resolver()
        .resolve_traces(&source, &files, false, &ResolveOpts::default())
        .unwrap();
    let expected = "\
<event name=\"sample\" index=\"0\"></event>
sqldk!SOS_Scheduler::Switch+9
sqldk!SOS_Task::Param::Execute+1

<event name=\"sample\" index=\"1\"></event>
sqldk!SOS_Task::Param::Execute+2

<event name=\"sample\" index=\"2\"></event>
sqldk!SOS_Scheduler::Switch+9
sqldk!SOS_Task::Param::Execute+1
";
    assert_eq!(resolution, Resolution::Complete(expected.to_string()));
}

/// Make sure that trace files without call stacks produce no output
/// and that ingestion failures are reported.
#[test]
fn trace_ingestion_errors() {
    let dir = tempdir().unwrap();
    let empty = dir.path().join("empty.xel");
    let () = write(&empty, "\n\n").unwrap();
    let source = FakeTraceSource::new();
    let resolver = resolver();
    let opts = ResolveOpts::default();

    let resolution = resolver
        .resolve_traces(&source, &[empty], true, &opts)
        .unwrap();
    assert_eq!(resolution, Resolution::Complete(String::new()));

    let missing = dir.path().join("missing.xel");
    let err = resolver
        .resolve_traces(&source, &[missing], true, &opts)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = resolver
        .resolve_traces(&source, &[], true, &opts)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
