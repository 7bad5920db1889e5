use std::fs::create_dir;
use std::fs::write;
use std::sync::Arc;

use callsym::__private::build_pe_image;
use callsym::__private::FakeModule;
use callsym::__private::FakeProvider;
use callsym::ErrorKind;
use callsym::ExportTable;
use callsym::Resolution;
use callsym::ResolveOpts;
use callsym::StackResolver;

use tempfile::tempdir;
use test_log::test;


/// Check that we can read the export table of PE32 and PE32+ images
/// from disk.
#[test]
fn export_table_from_file() {
    let dir = tempdir().unwrap();

    for pe32_plus in [false, true] {
        let path = dir.path().join(format!("image{}.dll", u8::from(pe32_plus)));
        let image = build_pe_image(100, &[0x1000, 0, 0x3000], pe32_plus);
        let () = write(&path, image).unwrap();

        let table = ExportTable::open(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(100).map(|entry| entry.addr), Some(0x1000));
        assert_eq!(table.find(101), None);
        assert_eq!(table.find(102).map(|entry| entry.addr), Some(0x3000));
        assert_eq!(table.find(102).unwrap().name(), "Ordinal102");
    }
}

/// Make sure that we report missing and invalid images sensibly.
#[test]
fn export_table_errors() {
    let dir = tempdir().unwrap();
    let err = ExportTable::open(dir.path().join("does-not-exist.dll")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let path = dir.path().join("garbage.dll");
    let () = write(&path, b"this is not a PE image at all, not even close").unwrap();
    let err = ExportTable::open(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
}

/// Check that frames referencing exports by ordinal are translated
/// into module relative form and resolved.
#[test]
fn resolve_ordinal_frames() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("binn");
    let () = create_dir(&nested).unwrap();
    let image = build_pe_image(297, &[0x1000, 0x3060, 0x5000], true);
    let () = write(nested.join("SqlMin.dll"), image).unwrap();

    let provider = FakeProvider::new().module(
        "sqlmin",
        FakeModule::new().func("CQScanNLJoinNew::GetRow", 0x3000, 0x1000),
    );
    let provider = Arc::new(provider);
    let resolver = StackResolver::builder()
        .set_search_paths([dir.path()])
        .enable_recursive_search(true)
        .build(provider);

    let input = "\
sqlmin!Ordinal298+0x4A5
sqlmin.dll!Ordinal400+0x10
other!Ordinal1+0x10";
    let resolution = resolver.resolve(input, &ResolveOpts::default()).unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete(
            "sqlmin!CQScanNLJoinNew::GetRow+1285\nsqlmin.dll!Ordinal400+0x10\nother!Ordinal1+0x10\n"
                .to_string()
        )
    );
}

/// Check that translated ordinal frames are emitted in module
/// relative form when no symbols are available.
#[test]
fn ordinal_frames_without_symbols() {
    let dir = tempdir().unwrap();
    let image = build_pe_image(297, &[0x1000, 0x3060], false);
    let () = write(dir.path().join("sqlmin.dll"), image).unwrap();

    let resolver = StackResolver::builder()
        .set_search_paths([dir.path()])
        .build(Arc::new(FakeProvider::new()));
    let resolution = resolver
        .resolve("02 sqlmin!Ordinal298+0x4a5", &ResolveOpts::default())
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete("02 sqlmin.dll+0x3505\n".to_string())
    );

    // Images in sub-directories are only found in recursive mode.
    let nested = tempdir().unwrap();
    let () = create_dir(nested.path().join("sub")).unwrap();
    let image = build_pe_image(1, &[0x2000], false);
    let () = write(nested.path().join("sub").join("mod.dll"), image).unwrap();
    let resolver = StackResolver::builder()
        .set_search_paths([nested.path()])
        .build(Arc::new(FakeProvider::new()));
    let resolution = resolver
        .resolve("mod!Ordinal1+0x1", &ResolveOpts::default())
        .unwrap();
    assert_eq!(
        resolution,
        Resolution::Complete("mod!Ordinal1+0x1\n".to_string())
    );
}
