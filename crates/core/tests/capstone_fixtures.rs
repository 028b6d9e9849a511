#![cfg(feature = "capstone-backend")]

use std::path::Path;

use bintag_core::model::ArchInfo;
use bintag_core::services::backends::CapstoneBackend;
use bintag_core::services::export::build_export;
use bintag_core::services::host::{AnalysisHost, HostBackend, HostError, LoadRequest};
use object::write::{Object, SectionId, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

fn text_symbol(name: &[u8], value: u64, size: u64, section: SectionId) -> Symbol {
    Symbol {
        name: name.to_vec(),
        value,
        size,
        kind: SymbolKind::Text,
        scope: SymbolScope::Linkage,
        weak: false,
        section: SymbolSection::Section(section),
        flags: SymbolFlags::None,
    }
}

/// x86_64 relocatable with `foo` (mov, mov, add) followed by `bar` (push, ret).
fn write_elf_fixture(path: &Path) {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text_id = obj.add_section(Vec::new(), b".text".to_vec(), SectionKind::Text);

    let foo = [
        0xB8, 0x01, 0x00, 0x00, 0x00, // mov eax, 1
        0xBB, 0x02, 0x00, 0x00, 0x00, // mov ebx, 2
        0x01, 0xD8, // add eax, ebx
    ];
    let bar = [0x55, 0xC3]; // push rbp; ret
    obj.section_mut(text_id).set_data(foo.iter().chain(bar.iter()).copied().collect::<Vec<u8>>(), 1);

    obj.add_symbol(text_symbol(b"foo", 0, foo.len() as u64, text_id));
    obj.add_symbol(text_symbol(b"bar", foo.len() as u64, bar.len() as u64, text_id));

    std::fs::write(path, obj.write().unwrap()).unwrap();
}

#[test]
fn elf_relocatable_exports_symbol_histograms() {
    let temp = tempfile::tempdir().unwrap();
    let bin_path = temp.path().join("fixture.o");
    write_elf_fixture(&bin_path);

    let mut host = CapstoneBackend.load(&LoadRequest::new(&bin_path)).expect("load elf");
    let record = build_export(host.as_mut()).expect("export elf");

    assert_eq!(record.arch, ArchInfo::new(true, true));
    assert_eq!(
        serde_json::to_value(&record.histogram).unwrap(),
        serde_json::json!({"foo": {"add": 1, "mov": 2}, "bar": {"push": 1, "ret": 1}})
    );
    assert!(record.imports.is_empty());
}

#[test]
fn functions_are_reported_in_address_order() {
    let temp = tempfile::tempdir().unwrap();
    let bin_path = temp.path().join("fixture.o");
    write_elf_fixture(&bin_path);

    let mut host = CapstoneBackend.load(&LoadRequest::new(&bin_path)).unwrap();
    assert!(matches!(host.functions(), Err(HostError::AnalysisPending)));
    host.wait_for_analysis().unwrap();
    let names: Vec<String> = host.functions().unwrap().into_iter().map(|f| f.name).collect();
    assert_eq!(names, vec!["foo", "bar"]);
}

#[test]
fn raw_blob_becomes_single_function() {
    let temp = tempfile::tempdir().unwrap();
    let bin_path = temp.path().join("shellcode.bin");
    // push ebp; mov ebp, esp; ret
    std::fs::write(&bin_path, [0x55, 0x89, 0xE5, 0xC3]).unwrap();

    let mut request = LoadRequest::new(&bin_path);
    request.arch = Some("x86".into());
    let mut host = CapstoneBackend.load(&request).unwrap();
    let record = build_export(host.as_mut()).unwrap();

    assert_eq!(record.arch, ArchInfo::new(true, false));
    assert_eq!(record.histogram.len(), 1);
    let sub_0 = &record.histogram["sub_0"];
    assert_eq!(sub_0["push"], 1);
    assert_eq!(sub_0["mov"], 1);
    assert_eq!(sub_0["ret"], 1);
}

#[test]
fn instruction_cap_limits_decoding() {
    let temp = tempfile::tempdir().unwrap();
    let bin_path = temp.path().join("nops.bin");
    std::fs::write(&bin_path, [0x90u8; 32]).unwrap();

    let mut request = LoadRequest::new(&bin_path);
    request.max_instructions = Some(4);
    let mut host = CapstoneBackend.load(&request).unwrap();
    let record = build_export(host.as_mut()).unwrap();
    assert_eq!(record.histogram["sub_0"]["nop"], 4);
}

#[test]
fn missing_binary_and_unknown_arch_fail() {
    let temp = tempfile::tempdir().unwrap();
    let missing = CapstoneBackend.load(&LoadRequest::new(temp.path().join("nope")));
    assert!(matches!(missing, Err(HostError::MissingBinary(_))));

    let bin_path = temp.path().join("blob.bin");
    std::fs::write(&bin_path, [0xC3]).unwrap();
    let mut request = LoadRequest::new(&bin_path);
    request.arch = Some("z80".into());
    let mut host = CapstoneBackend.load(&request).unwrap();
    assert!(matches!(host.wait_for_analysis(), Err(HostError::Backend(_))));
}

/// PE32+ whose image base plus section/entry RVA does not fit in 64 bits.
fn write_overflowing_pe(path: &Path) {
    let mut image = vec![0u8; 0x400];
    let put = |image: &mut Vec<u8>, offset: usize, bytes: &[u8]| {
        image[offset..offset + bytes.len()].copy_from_slice(bytes);
    };
    put(&mut image, 0, b"MZ");
    put(&mut image, 0x3C, &0x80u32.to_le_bytes());
    put(&mut image, 0x80, b"PE\0\0");

    // COFF header: AMD64, one section, PE32+ optional header.
    put(&mut image, 0x84, &0x8664u16.to_le_bytes());
    put(&mut image, 0x86, &1u16.to_le_bytes());
    put(&mut image, 0x94, &0xF0u16.to_le_bytes());
    put(&mut image, 0x96, &0x22u16.to_le_bytes());

    let opt = 0x98;
    put(&mut image, opt, &0x20Bu16.to_le_bytes());
    put(&mut image, opt + 16, &0x1000u32.to_le_bytes()); // entry
    put(&mut image, opt + 24, &0xFFFF_FFFF_FFFF_F000u64.to_le_bytes()); // image base
    put(&mut image, opt + 32, &0x1000u32.to_le_bytes());
    put(&mut image, opt + 36, &0x200u32.to_le_bytes());
    put(&mut image, opt + 56, &0x2000u32.to_le_bytes());
    put(&mut image, opt + 60, &0x200u32.to_le_bytes());
    put(&mut image, opt + 68, &3u16.to_le_bytes());
    put(&mut image, opt + 108, &16u32.to_le_bytes());

    let sec = opt + 0xF0;
    put(&mut image, sec, b".text\0\0\0");
    put(&mut image, sec + 8, &0x10u32.to_le_bytes());
    put(&mut image, sec + 12, &0x1000u32.to_le_bytes());
    put(&mut image, sec + 16, &0x200u32.to_le_bytes());
    put(&mut image, sec + 20, &0x200u32.to_le_bytes());
    put(&mut image, sec + 36, &0x6000_0020u32.to_le_bytes());

    image[0x200] = 0xC3; // ret
    std::fs::write(path, image).unwrap();
}

#[test]
fn pe_addresses_past_u64_max_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let bin_path = temp.path().join("high_base.exe");
    write_overflowing_pe(&bin_path);

    match CapstoneBackend.load(&LoadRequest::new(&bin_path)) {
        Ok(mut host) => {
            let record = build_export(host.as_mut()).expect("export pe");
            assert_eq!(record.arch, ArchInfo::new(true, true));
            assert!(record.histogram.is_empty(), "unexpected functions: {:?}", record.histogram);
        }
        Err(HostError::Parse(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
}
