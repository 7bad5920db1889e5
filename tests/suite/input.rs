use std::sync::Arc;

use callsym::__private::FakeProvider;
use callsym::classify;
use callsym::Classification;
use callsym::ErrorKind;
use callsym::Frame;
use callsym::ModuleRegistry;
use callsym::Resolution;
use callsym::ResolveOpts;
use callsym::StackResolver;

use test_log::test;


/// Check that histogram slots are split into weighted call stacks.
#[test]
fn classify_histogram() {
    let input = r#"<HistogramTarget truncated="0" buckets="256">
  <Slot count="5"><value>sqldk+0x1</value></Slot>
  <Slot count="3"><value>sqldk+0x2</value></Slot>
</HistogramTarget>"#;

    let units = match classify(input) {
        Classification::Units(units) => units,
        Classification::UnrecognizedSchema => panic!("histogram not recognized"),
    };
    let weights = units.iter().map(|unit| unit.weight).collect::<Vec<_>>();
    assert_eq!(weights, vec![5, 3]);
    let keys = units
        .iter()
        .map(|unit| unit.key.as_deref())
        .collect::<Vec<_>>();
    assert_eq!(keys, vec![Some("Slot_0"), Some("Slot_1")]);
    assert!(units.iter().all(|unit| unit.resolved().is_none()));
}

/// Check that non-XML input makes for a single call stack.
#[test]
fn classify_plain_text() {
    let input = "sqldk+0x1\n<not xml";
    match classify(input) {
        Classification::Units(units) => {
            assert_eq!(units.len(), 1);
            assert_eq!(units[0].text, input);
            assert_eq!(units[0].annotation, None);
        }
        Classification::UnrecognizedSchema => panic!("plain text not recognized"),
    }
}

/// Check that frames in their various textual forms are recognized.
#[test]
fn frame_forms() {
    assert!(matches!(
        Frame::parse("sqlmin!Ordinal298+0x4A5", false),
        Frame::Ordinal {
            ordinal: 298,
            offset: 0x4a5,
            ..
        }
    ));
    assert!(matches!(
        Frame::parse("0x00000001`0042249f", false),
        Frame::AddressOnly {
            addr: 0x10042249f,
            ..
        }
    ));
    assert!(matches!(
        Frame::parse("03 sqldk.dll+0x40609", false),
        Frame::Canonical {
            prefix: "03 ",
            module: "sqldk",
            rva: 0x40609,
        }
    ));
    assert_eq!(
        Frame::parse("sqldk!SOS_Scheduler::Switch+0x9", false),
        Frame::Passthrough
    );
    assert!(matches!(
        Frame::parse("sqldk!SOS_Scheduler::Switch+0x9", true),
        Frame::Symbolized {
            symbol: "SOS_Scheduler::Switch",
            offset: 9,
            ..
        }
    ));
    assert_eq!(Frame::parse("some random text", true), Frame::Passthrough);
}

/// Check module base address lookups through the public interface.
#[test]
fn module_registry() {
    let registry = ModuleRegistry::parse(
        "\
c:\\binn\\sqlmin.dll 0x7ffd10000000
c:\\binn\\sqldk.dll 0x7ffd20000000
",
    )
    .unwrap();
    assert_eq!(registry.ranges().len(), 2);
    assert_eq!(registry.find(0x7ffd1fffffff).unwrap().module, "sqlmin");
    assert_eq!(registry.find(0x7ffd20000000).unwrap().module, "sqldk");
    assert_eq!(registry.find(0x1000), None);

    let err = ModuleRegistry::parse("sqldk.dll").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

/// Check that XML of unknown shape yields no output.
#[test]
fn unrecognized_schema() {
    let resolver = StackResolver::new(Arc::new(FakeProvider::new()));
    let resolution = resolver
        .resolve("<Root><Row>sqldk+0x1</Row></Root>", &ResolveOpts::default())
        .unwrap();
    assert_eq!(resolution, Resolution::UnrecognizedSchema);
}

/// Check that escaped XML frame rows are understood and that malformed
/// ones are reported.
#[test]
fn xml_frame_rows() {
    let resolver = StackResolver::new(Arc::new(FakeProvider::new()));
    let input = "&lt;frame id=\"00\" module=\"sqldk.dll\" rva=\"0x40609\" /&gt;";
    let resolution = resolver.resolve(input, &ResolveOpts::default()).unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete("00 sqldk+0x40609\n".to_string())
    );

    let input = r#"<frame id="00" module="sqldk.dll" rva="0xZZ" />"#;
    let err = resolver.resolve(input, &ResolveOpts::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}
