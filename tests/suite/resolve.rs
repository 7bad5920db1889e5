use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use callsym::__private::FakeModule;
use callsym::__private::FakeProvider;
use callsym::ErrorKind;
use callsym::Resolution;
use callsym::ResolveOpts;
use callsym::RunControl;
use callsym::StackResolver;
use callsym::SymKind;

use test_log::test;


fn sqldk() -> FakeModule {
    FakeModule::new()
        .sym(
            "SOS_Scheduler::Switch",
            0x40600,
            0x100,
            SymKind::Function,
            Some(("sos.cpp", 1402)),
        )
        .func("SOS_Task::Param::Execute", 0x1000, 0x200)
}


/// Check that module relative frames are resolved, with and without
/// displacements.
#[test]
fn resolve_module_relative_frames() {
    let provider = FakeProvider::new().module("sqldk", sqldk());
    let resolver = StackResolver::new(Arc::new(provider));

    let input = "sqldk.dll+0x40609\n00 sqldk+0x1010\nunknown+0x1";
    let resolution = resolver.resolve(input, &ResolveOpts::default()).unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete(
            "sqldk!SOS_Scheduler::Switch+9\n00 sqldk!SOS_Task::Param::Execute+16\nunknown+0x1\n"
                .to_string()
        )
    );

    let opts = ResolveOpts {
        include_offsets: false,
        code_info: true,
        ..Default::default()
    };
    let resolution = resolver.resolve("sqldk+0x40609", &opts).unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete("sqldk!SOS_Scheduler::Switch (sos.cpp:1402)\n".to_string())
    );
}

/// Check that already symbolized frames get source code information
/// attached when asked to.
#[test]
fn resolve_symbolized_frames() {
    let provider = FakeProvider::new().module("sqldk", sqldk());
    let resolver = StackResolver::new(Arc::new(provider));
    let opts = ResolveOpts {
        code_info: true,
        relookup: true,
        ..Default::default()
    };

    let resolution = resolver
        .resolve("sqldk!SOS_Scheduler::Switch+0x9", &opts)
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete("sqldk!SOS_Scheduler::Switch+9 (sos.cpp:1402)\n".to_string())
    );

    // Without re-lookup the frame is left alone.
    let opts = ResolveOpts {
        code_info: true,
        ..Default::default()
    };
    let resolution = resolver
        .resolve("sqldk!SOS_Scheduler::Switch+0x9", &opts)
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete("sqldk!SOS_Scheduler::Switch+0x9\n".to_string())
    );
}

/// Check that absolute addresses are attributed to modules using a
/// base address listing.
#[test]
fn resolve_absolute_addresses() {
    let provider = FakeProvider::new().module("sqldk", sqldk());
    let resolver = StackResolver::new(Arc::new(provider));
    let opts = ResolveOpts {
        base_addrs: Some(
            "c:\\mssql\\binn\\sqlmin.dll 0x00007FFD10000000\n\
             c:\\mssql\\binn\\sqldk.dll 0x00007FFD20000000\n"
                .to_string(),
        ),
        ..Default::default()
    };

    let input = "0x00007FFD20040609\n0x00007ffd10000042\n0x42";
    let resolution = resolver.resolve(input, &opts).unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete("sqldk!SOS_Scheduler::Switch+9\nsqlmin+0x42\n0x42\n".to_string())
    );
}

/// Make sure that a base address listing with two modules at the same
/// address is rejected.
#[test]
fn resolve_duplicate_base_addresses() {
    let resolver = StackResolver::new(Arc::new(FakeProvider::new()));
    let opts = ResolveOpts {
        base_addrs: Some("a.dll 0x1000\nb.dll 0x1000".to_string()),
        ..Default::default()
    };

    let err = resolver.resolve("0x1000", &opts).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

/// Check that the slots of a call stack histogram are reported in
/// input order, each with its annotation.
#[test]
fn resolve_histogram() {
    let provider = FakeProvider::new().module("sqldk", sqldk());
    let resolver = StackResolver::builder()
        .set_max_workers(2)
        .build(Arc::new(provider));

    let input = r#"<HistogramTarget truncated="0" buckets="256">
  <Slot count="5">
    <value>sqldk+0x40609
sqldk+0x1001</value>
  </Slot>
  <Slot count="3">
    <value>sqldk+0x1002</value>
  </Slot>
</HistogramTarget>"#;
    let resolution = resolver.resolve(input, &ResolveOpts::default()).unwrap();
    let expected = "\
Slot_0 [count:5]
sqldk!SOS_Scheduler::Switch+9
sqldk!SOS_Task::Param::Execute+1

Slot_1 [count:3]
sqldk!SOS_Task::Param::Execute+2
";
    assert_eq!(resolution, Resolution::Complete(expected.to_string()));
}

/// Check that call stacks embedded in an event stream are resolved
/// and annotated with their event.
#[test]
fn resolve_event_stream() {
    let provider = FakeProvider::new().module("sqldk", sqldk());
    let resolver = StackResolver::new(Arc::new(provider));

    let input = r#"<RingBufferTarget>
<event name="wait_info" package="sqlos">
  <action name="callstack" package="package0"><value>sqldk+0x40609</value></action>
</event>
</RingBufferTarget>"#;
    let resolution = resolver.resolve(input, &ResolveOpts::default()).unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete(
            "<event name=\"wait_info\" package=\"sqlos\"></event>\nsqldk!SOS_Scheduler::Switch+9\n"
                .to_string()
        )
    );
}

/// Check that XML frame rows are resolved and hand their module
/// metadata to the provider.
#[test]
fn resolve_xml_frame_rows() {
    let provider = Arc::new(FakeProvider::new().module("sqldk", sqldk()));
    let resolver = StackResolver::new(provider.clone());

    let input = r#"<frame id="00" pdb="sqldk.pdb" age="1" guid="{5A1E2B3C-4D5E-6F70-8192-A3B4C5D6E7F8}" module="sqldk.dll" rva="0x40609" address="0x7FFD20040609"/>
<frame id="01" module="sqldk.dll" rva="0x1001"/>
0x7FFD20001002"#;
    let resolution = resolver.resolve(input, &ResolveOpts::default()).unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete(
            "00 sqldk!SOS_Scheduler::Switch+9\n01 sqldk!SOS_Task::Param::Execute+1\nsqldk!SOS_Task::Param::Execute+2\n"
                .to_string()
        )
    );

    let prepared = provider.prepared();
    assert_eq!(prepared.len(), 1);
    assert_eq!(prepared[0].module, "sqldk");
    assert_eq!(prepared[0].pdb, "sqldk.pdb");
    assert_eq!(prepared[0].guid, "5A1E2B3C-4D5E-6F70-8192-A3B4C5D6E7F8");
    assert_eq!(prepared[0].age, 1);
}

/// Check that inlined functions are reported ahead of the function
/// they got inlined into.
#[test]
fn resolve_inlined_functions() {
    let module = sqldk().inlined(0x40609, "SOS_Scheduler::Yield", Some(("sos.h", 77)));
    let provider = FakeProvider::new().module("sqldk", module);
    let resolver = StackResolver::new(Arc::new(provider));
    let opts = ResolveOpts {
        code_info: true,
        inlined_fns: true,
        ..Default::default()
    };

    let resolution = resolver.resolve("05 sqldk+0x40609", &opts).unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete(
            "05 (Inline Function) sqldk!SOS_Scheduler::Yield+0 (sos.h:77)\n\
             sqldk!SOS_Scheduler::Switch+9 (sos.cpp:1402)\n"
                .to_string()
        )
    );
}

/// Check that repeated frames across many call stacks resolve
/// identically, independent of the worker count.
#[test]
fn resolve_concurrently() {
    let input = (0..64)
        .map(|idx| {
            format!(
                "<Slot count=\"{}\"><value>sqldk+0x40609\nsqldk+0x{:x}</value></Slot>",
                idx + 1,
                0x1000 + idx
            )
        })
        .collect::<String>();
    let input = format!("<HistogramTarget>{input}</HistogramTarget>");

    let outputs = [1, 4, 16]
        .into_iter()
        .map(|workers| {
            let provider = Arc::new(FakeProvider::new().module("sqldk", sqldk()));
            let resolver = StackResolver::builder()
                .set_max_workers(workers)
                .build(provider.clone());
            let resolution = resolver.resolve(&input, &ResolveOpts::default()).unwrap();
            // A session per worker at most.
            assert!(provider.loads() <= workers, "{}", provider.loads());
            resolution
        })
        .collect::<Vec<_>>();

    assert!(matches!(outputs[0], Resolution::Complete(_)));
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);

    if let Resolution::Complete(output) = &outputs[0] {
        assert_eq!(output.matches("sqldk!SOS_Scheduler::Switch+9").count(), 64);
        assert!(output.starts_with("Slot_0 [count:1]\n"), "{output}");
        assert!(output.contains("Slot_63 [count:64]\n"), "{output}");
    }
}

/// Check that every frame keeps its own spelling of the module name,
/// no matter which worker resolved the address first.
#[test]
fn resolve_mixed_case_modules() {
    let module = |idx: usize| if idx % 2 == 0 { "SQLDK" } else { "sqldk" };
    let input = (0..32)
        .map(|idx| {
            format!(
                "<Slot count=\"1\"><value>{}+0x40609</value></Slot>",
                module(idx)
            )
        })
        .collect::<String>();
    let input = format!("<HistogramTarget>{input}</HistogramTarget>");
    let expected = (0..32)
        .map(|idx| {
            format!(
                "Slot_{idx} [count:1]\n{}!SOS_Scheduler::Switch+9\n",
                module(idx)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    for workers in [1, 4, 16] {
        let provider = FakeProvider::new().module("sqldk", sqldk());
        let resolver = StackResolver::builder()
            .set_max_workers(workers)
            .build(Arc::new(provider));
        let resolution = resolver.resolve(&input, &ResolveOpts::default()).unwrap();
        assert_eq!(resolution, Resolution::Complete(expected.clone()), "{workers}");
    }

    let resolver = StackResolver::new(Arc::new(FakeProvider::new().module("sqldk", sqldk())));
    for input in ["SQLDK+0x40609\nsqldk+0x40609", "sqldk+0x40609\nSQLDK+0x40609"] {
        let expected = input
            .lines()
            .map(|line| line.replace("+0x40609", "!SOS_Scheduler::Switch+9\n"))
            .collect::<String>();
        let resolution = resolver.resolve(input, &ResolveOpts::default()).unwrap();
        assert_eq!(resolution, Resolution::Complete(expected));
    }
}

/// Check that progress is reported and reaches completion.
#[test]
fn resolve_progress() {
    let reports = Arc::new(AtomicUsize::new(0));
    let last = Arc::new(AtomicUsize::new(0));
    let provider = FakeProvider::new().module("sqldk", sqldk());
    let resolver = {
        let reports = Arc::clone(&reports);
        let last = Arc::clone(&last);
        StackResolver::builder()
            .set_max_workers(1)
            .set_progress_callback(move |percent| {
                let _prev = reports.fetch_add(1, Ordering::Relaxed);
                let () = last.store(usize::from(percent), Ordering::Relaxed);
            })
            .build(Arc::new(provider))
    };

    let control = RunControl::new();
    let opts = ResolveOpts {
        control: Some(control.clone()),
        ..Default::default()
    };
    let input = "<HistogramTarget><Slot count=\"1\"><value>sqldk+0x1</value></Slot>\
                 <Slot count=\"2\"><value>sqldk+0x2</value></Slot></HistogramTarget>";
    let resolution = resolver.resolve(input, &opts).unwrap();
    assert!(matches!(resolution, Resolution::Complete(_)));
    assert_eq!(reports.load(Ordering::Relaxed), 2);
    assert_eq!(last.load(Ordering::Relaxed), 100);
    assert_eq!(control.progress(), 100);
}

/// Make sure that a cancelled run produces no output.
#[test]
fn resolve_cancelled() {
    let control = RunControl::new();
    let provider = FakeProvider::new()
        .module("sqldk", sqldk())
        .cancel_on_load(control.clone());
    let resolver = StackResolver::builder()
        .set_max_workers(4)
        .build(Arc::new(provider));

    let input = (0..100)
        .map(|_| "<Slot count=\"1\"><value>sqldk+0x40609</value></Slot>")
        .collect::<String>();
    let input = format!("<HistogramTarget>{input}</HistogramTarget>");
    let opts = ResolveOpts {
        control: Some(control.clone()),
        ..Default::default()
    };

    let mut output = Vec::new();
    let resolution = resolver.resolve_to(&input, &opts, &mut output).unwrap();
    assert_eq!(resolution, Resolution::Cancelled);
    assert!(output.is_empty());
    assert!(control.progress() < 100);
}

/// Check that a run can be cancelled from another thread.
#[test]
fn resolve_cancelled_upfront() {
    let provider = FakeProvider::new().module("sqldk", sqldk());
    let resolver = StackResolver::new(Arc::new(provider));
    let control = RunControl::new();

    let () = thread::scope(|scope| {
        let handle = scope.spawn(|| control.cancel());
        let () = handle.join().unwrap();
    });

    let opts = ResolveOpts {
        control: Some(control),
        ..Default::default()
    };
    let resolution = resolver.resolve("sqldk+0x1", &opts).unwrap();
    assert_eq!(resolution, Resolution::Cancelled);
}

/// Check that the `Debug` representation of a resolver is sensible.
#[test]
fn resolver_debug() {
    let resolver = StackResolver::builder()
        .set_search_paths(["/symbols"])
        .enable_recursive_search(true)
        .build(Arc::new(FakeProvider::new()));
    let debug = format!("{resolver:?}");
    assert!(debug.contains("/symbols"), "{debug}");
    assert!(debug.contains("recursive: true"), "{debug}");
}
