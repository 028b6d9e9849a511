use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;

use capstone::{arch, prelude::*, Capstone, InsnGroupId};
use goblin::{elf, mach, pe, Object};
use tracing::{debug, info, warn};

use crate::model::{ArchInfo, FunctionRecord};
use crate::services::host::{AnalysisHost, HostBackend, HostError, LoadRequest};

/// Per-function instruction cap when the request does not set one.
pub const DEFAULT_MAX_INSTRUCTIONS: usize = 1 << 16;

/// Upper bound on functions discovered through call targets.
const MAX_DISCOVERED_FUNCTIONS: usize = 1 << 17;

/// goblin needs this many bytes to identify a container.
const MIN_HEADER_LEN: usize = 16;

const PE_SCN_CNT_CODE: u32 = 0x0000_0020;
const PE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
const MACH_S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;
const MACH_S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;

pub struct CapstoneBackend;

#[derive(Debug, Clone)]
struct SectionRange {
    name: String,
    start: u64,
    end: u64,
    file_offset: usize,
    file_size: usize,
    executable: bool,
}

#[derive(Debug, Clone)]
struct Candidate {
    name: String,
    size: Option<u64>,
    section: Option<usize>,
}

#[derive(Debug, Clone)]
struct ImportModule {
    name: String,
    names: Vec<String>,
}

/// Owned view of a parsed image; nothing borrows the raw bytes.
#[derive(Debug)]
struct LoadedImage {
    bytes: Vec<u8>,
    cs_arch: String,
    arch: ArchInfo,
    sections: Vec<SectionRange>,
    seeds: BTreeMap<u64, Candidate>,
    imports: Vec<ImportModule>,
    discover_calls: bool,
}

#[derive(Debug)]
struct Analysis {
    functions: Vec<FunctionRecord>,
    mnemonics: HashMap<u64, Vec<String>>,
}

/// A binary loaded through goblin and decoded with Capstone.
pub struct CapstoneHost {
    image: LoadedImage,
    max_instructions: usize,
    analysis: Option<Analysis>,
}

fn width_flags(bits: u32) -> ArchInfo {
    // 64-bit images keep the flat 32-bit flag set.
    ArchInfo::new(bits >= 32, bits >= 64)
}

fn arch_bits(cs_arch: &str) -> u32 {
    match cs_arch {
        "x86_64" | "amd64" | "arm64" | "aarch64" | "riscv" | "riscv64" | "ppc" | "powerpc"
        | "ppc64" => 64,
        "x86" | "i386" | "arm" | "armv7" | "riscv32" => 32,
        _ => 0,
    }
}

fn capstone_arch_from_hint(hint: Option<&str>) -> Option<String> {
    hint.map(|h| h.to_lowercase())
}

fn capstone_arch_from_object(obj: &Object) -> Option<String> {
    match obj {
        Object::Elf(elf) => match elf.header.e_machine {
            elf::header::EM_X86_64 => Some("x86_64".into()),
            elf::header::EM_386 => Some("x86".into()),
            elf::header::EM_AARCH64 => Some("arm64".into()),
            elf::header::EM_ARM => Some("arm".into()),
            elf::header::EM_RISCV => {
                Some(if elf.is_64 { "riscv64".into() } else { "riscv32".into() })
            }
            _ => None,
        },
        Object::PE(pe) => match pe.header.coff_header.machine {
            pe::header::COFF_MACHINE_X86 => Some("x86".into()),
            pe::header::COFF_MACHINE_X86_64 => Some("x86_64".into()),
            pe::header::COFF_MACHINE_ARM => Some("arm".into()),
            pe::header::COFF_MACHINE_ARM64 => Some("arm64".into()),
            _ => None,
        },
        Object::Mach(mach::Mach::Binary(bin)) => match bin.header.cputype() {
            mach::cputype::CPU_TYPE_X86 => Some("x86".into()),
            mach::cputype::CPU_TYPE_X86_64 => Some("x86_64".into()),
            mach::cputype::CPU_TYPE_ARM => Some("arm".into()),
            mach::cputype::CPU_TYPE_ARM64 => Some("arm64".into()),
            _ => None,
        },
        _ => None,
    }
}

fn make_cs(arch: &str, detail: bool) -> Result<Capstone, HostError> {
    let built = match arch {
        "x86_64" | "amd64" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode64).detail(detail).build()
        }
        "x86" | "i386" => {
            Capstone::new().x86().mode(arch::x86::ArchMode::Mode32).detail(detail).build()
        }
        "arm" | "armv7" => {
            Capstone::new().arm().mode(arch::arm::ArchMode::Arm).detail(detail).build()
        }
        "arm64" | "aarch64" => {
            Capstone::new().arm64().mode(arch::arm64::ArchMode::Arm).detail(detail).build()
        }
        "riscv" | "riscv64" => {
            Capstone::new().riscv().mode(arch::riscv::ArchMode::RiscV64).detail(detail).build()
        }
        "riscv32" => {
            Capstone::new().riscv().mode(arch::riscv::ArchMode::RiscV32).detail(detail).build()
        }
        "ppc" | "powerpc" | "ppc64" => {
            Capstone::new().ppc().mode(arch::ppc::ArchMode::Mode64).detail(detail).build()
        }
        other => return Err(HostError::Backend(format!("unsupported architecture: {other}"))),
    };
    built.map_err(|e| HostError::Backend(format!("capstone init failed for {arch}: {e}")))
}

fn decode_call_target(detail: &capstone::InsnDetail) -> Option<u64> {
    detail.arch_detail().operands().iter().find_map(|op| match op {
        capstone::arch::ArchOperand::X86Operand(op) => {
            if let capstone::arch::x86::X86OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::ArmOperand(op) => {
            if let capstone::arch::arm::ArmOperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        capstone::arch::ArchOperand::Arm64Operand(op) => {
            if let capstone::arch::arm64::Arm64OperandType::Imm(imm) = op.op_type {
                Some(imm as u64)
            } else {
                None
            }
        }
        _ => None,
    })
}

fn elf_sections(elf: &elf::Elf) -> Vec<SectionRange> {
    if elf.section_headers.is_empty() {
        // Section-less images: fall back to loadable segments.
        return elf
            .program_headers
            .iter()
            .filter(|ph| ph.p_type == elf::program_header::PT_LOAD)
            .map(|ph| SectionRange {
                name: "LOAD".to_string(),
                start: ph.p_vaddr,
                end: ph.p_vaddr.saturating_add(ph.p_memsz),
                file_offset: ph.p_offset as usize,
                file_size: ph.p_filesz as usize,
                executable: ph.p_flags & elf::program_header::PF_X != 0,
            })
            .collect();
    }
    elf.section_headers
        .iter()
        .map(|sh| SectionRange {
            name: elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string(),
            start: sh.sh_addr,
            end: sh.sh_addr.saturating_add(sh.sh_size),
            file_offset: sh.sh_offset as usize,
            file_size: if sh.sh_type == elf::section_header::SHT_NOBITS {
                0
            } else {
                sh.sh_size as usize
            },
            executable: sh.sh_flags & u64::from(elf::section_header::SHF_EXECINSTR) != 0,
        })
        .collect()
}

/// Virtual address of `rva` in an image loaded at `image_base`, if it fits in 64 bits.
fn pe_address(image_base: u64, rva: u64) -> Option<u64> {
    image_base.checked_add(rva)
}

fn pe_sections(pe: &pe::PE) -> Vec<SectionRange> {
    let image_base = pe.image_base as u64;
    pe.sections
        .iter()
        .filter_map(|sec| {
            let name = sec.name().unwrap_or_default().to_string();
            let Some(start) = pe_address(image_base, u64::from(sec.virtual_address)) else {
                warn!(section = %name, image_base, "section address overflows, skipping");
                return None;
            };
            let size = if sec.virtual_size == 0 { sec.size_of_raw_data } else { sec.virtual_size };
            Some(SectionRange {
                name,
                start,
                end: start.saturating_add(u64::from(size)),
                file_offset: sec.pointer_to_raw_data as usize,
                file_size: sec.size_of_raw_data as usize,
                executable: sec.characteristics & (PE_SCN_MEM_EXECUTE | PE_SCN_CNT_CODE) != 0,
            })
        })
        .collect()
}

fn mach_sections(bin: &mach::MachO) -> Vec<SectionRange> {
    bin.segments
        .sections()
        .flatten()
        .filter_map(|res| res.ok())
        .map(|(sec, _)| SectionRange {
            name: sec.name().unwrap_or("").to_string(),
            start: sec.addr,
            end: sec.addr.saturating_add(sec.size),
            file_offset: sec.offset as usize,
            // Zero-fill sections have no file offset.
            file_size: if sec.offset == 0 { 0 } else { sec.size as usize },
            executable: sec.flags & (MACH_S_ATTR_PURE_INSTRUCTIONS | MACH_S_ATTR_SOME_INSTRUCTIONS)
                != 0,
        })
        .collect()
}

fn section_for(sections: &[SectionRange], address: u64) -> Option<usize> {
    sections
        .iter()
        .position(|s| s.executable && address >= s.start && address < s.end)
        .or_else(|| sections.iter().position(|s| address >= s.start && address < s.end))
}

fn insert_seed(
    seeds: &mut BTreeMap<u64, Candidate>,
    address: u64,
    name: String,
    size: Option<u64>,
    section: Option<usize>,
) {
    // First name seen for an address wins.
    seeds.entry(address).or_insert(Candidate { name, size: size.filter(|s| *s > 0), section });
}

fn elf_seeds(elf: &elf::Elf, sections: &[SectionRange]) -> BTreeMap<u64, Candidate> {
    let mut seeds = BTreeMap::new();
    let has_section_headers = !elf.section_headers.is_empty();
    let tables = [(&elf.syms, &elf.strtab), (&elf.dynsyms, &elf.dynstrtab)];
    for (syms, strtab) in tables {
        for sym in syms.iter() {
            if !sym.is_function() || sym.st_shndx == elf::section_header::SHN_UNDEF as usize {
                continue;
            }
            let name = strtab.get_at(sym.st_name).unwrap_or("");
            if name.is_empty() {
                continue;
            }
            let section = if has_section_headers && sym.st_shndx < sections.len() {
                Some(sym.st_shndx)
            } else {
                section_for(sections, sym.st_value)
            };
            insert_seed(&mut seeds, sym.st_value, name.to_string(), Some(sym.st_size), section);
        }
    }
    if elf.header.e_type != elf::header::ET_REL && elf.entry != 0 {
        let section = section_for(sections, elf.entry);
        insert_seed(&mut seeds, elf.entry, "start".to_string(), None, section);
    }
    seeds
}

fn pe_seeds(pe: &pe::PE, sections: &[SectionRange]) -> BTreeMap<u64, Candidate> {
    let image_base = pe.image_base as u64;
    let mut seeds = BTreeMap::new();
    for exp in &pe.exports {
        if exp.rva == 0 {
            continue;
        }
        let name = exp.name.unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        let Some(address) = pe_address(image_base, exp.rva as u64) else {
            warn!(export = name, image_base, "export address overflows, skipping");
            continue;
        };
        let section = section_for(sections, address);
        insert_seed(&mut seeds, address, name.to_string(), None, section);
    }
    if pe.entry != 0 {
        match pe_address(image_base, pe.entry as u64) {
            Some(address) => {
                let section = section_for(sections, address);
                insert_seed(&mut seeds, address, "start".to_string(), None, section);
            }
            None => warn!(entry = pe.entry, image_base, "entry point address overflows, skipping"),
        }
    }
    seeds
}

fn mach_seeds(bin: &mach::MachO, sections: &[SectionRange]) -> BTreeMap<u64, Candidate> {
    let mut seeds = BTreeMap::new();
    for sym in bin.symbols() {
        let Ok((name, nlist)) = sym else { continue };
        if nlist.n_sect == 0 || nlist.n_type & mach::symbols::N_STAB != 0 {
            continue;
        }
        let section = nlist.n_sect.checked_sub(1).filter(|idx| *idx < sections.len());
        if !section.map(|idx| sections[idx].executable).unwrap_or(false) {
            continue;
        }
        let name = name.trim_start_matches('_');
        if name.is_empty() {
            continue;
        }
        insert_seed(&mut seeds, nlist.n_value, name.to_string(), None, section);
    }
    if bin.entry != 0 {
        let section = section_for(sections, bin.entry);
        insert_seed(&mut seeds, bin.entry, "start".to_string(), None, section);
    }
    seeds
}

/// Group `(module, name)` pairs by module, keeping first-seen module order.
fn group_imports<'a>(pairs: impl Iterator<Item = (&'a str, String)>) -> Vec<ImportModule> {
    let mut modules: Vec<ImportModule> = Vec::new();
    for (module, name) in pairs {
        if name.is_empty() {
            continue;
        }
        match modules.iter_mut().find(|m| m.name == module) {
            Some(existing) => existing.names.push(name),
            None => modules.push(ImportModule { name: module.to_string(), names: vec![name] }),
        }
    }
    modules
}

fn elf_imports(elf: &elf::Elf) -> Vec<ImportModule> {
    let names: Vec<String> = elf
        .dynsyms
        .iter()
        .filter(|sym| sym.st_shndx == elf::section_header::SHN_UNDEF as usize)
        .filter_map(|sym| elf.dynstrtab.get_at(sym.st_name))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        Vec::new()
    } else {
        vec![ImportModule { name: ".dynsym".to_string(), names }]
    }
}

fn pe_imports(pe: &pe::PE) -> Vec<ImportModule> {
    group_imports(pe.imports.iter().map(|imp| (imp.dll, imp.name.to_string())))
}

fn mach_imports(bin: &mach::MachO) -> Vec<ImportModule> {
    match bin.imports() {
        Ok(imports) => {
            group_imports(imports.iter().map(|imp| (imp.dylib, imp.name.to_string())))
        }
        Err(e) => {
            warn!(error = %e, "failed to read Mach-O imports");
            Vec::new()
        }
    }
}

impl LoadedImage {
    fn parse(bytes: Vec<u8>, arch_hint: Option<&str>) -> Result<Self, HostError> {
        if bytes.len() < MIN_HEADER_LEN {
            let cs_arch = capstone_arch_from_hint(arch_hint).unwrap_or_else(|| "x86_64".into());
            return Ok(Self::raw(bytes, cs_arch));
        }

        let (cs_arch, parsed) = {
            let obj = Object::parse(&bytes).map_err(|e| HostError::Parse(e.to_string()))?;
            let cs_arch = capstone_arch_from_hint(arch_hint)
                .or_else(|| capstone_arch_from_object(&obj))
                .unwrap_or_else(|| "x86_64".to_string());
            let parsed = match &obj {
                Object::Elf(elf) => {
                    let sections = elf_sections(elf);
                    let seeds = elf_seeds(elf, &sections);
                    let arch = width_flags(if elf.is_64 { 64 } else { 32 });
                    let discover = elf.header.e_type != elf::header::ET_REL;
                    Some((arch, sections, seeds, elf_imports(elf), discover))
                }
                Object::PE(pe) => {
                    let sections = pe_sections(pe);
                    let seeds = pe_seeds(pe, &sections);
                    let arch = width_flags(if pe.is_64 { 64 } else { 32 });
                    Some((arch, sections, seeds, pe_imports(pe), true))
                }
                Object::Mach(mach::Mach::Binary(bin)) => {
                    let sections = mach_sections(bin);
                    let seeds = mach_seeds(bin, &sections);
                    let arch = width_flags(if bin.is_64 { 64 } else { 32 });
                    let discover = bin.header.filetype != mach::header::MH_OBJECT;
                    Some((arch, sections, seeds, mach_imports(bin), discover))
                }
                Object::Unknown(_) => None,
                _ => return Err(HostError::Parse("unsupported container format".to_string())),
            };
            (cs_arch, parsed)
        };

        match parsed {
            Some((arch, sections, seeds, imports, discover_calls)) => {
                Ok(Self { bytes, cs_arch, arch, sections, seeds, imports, discover_calls })
            }
            None => Ok(Self::raw(bytes, cs_arch)),
        }
    }

    /// A headerless blob: one function `sub_0` spanning the whole buffer.
    fn raw(bytes: Vec<u8>, cs_arch: String) -> Self {
        let mut seeds = BTreeMap::new();
        let mut sections = Vec::new();
        if !bytes.is_empty() {
            sections.push(SectionRange {
                name: "RAW".to_string(),
                start: 0,
                end: bytes.len() as u64,
                file_offset: 0,
                file_size: bytes.len(),
                executable: true,
            });
            insert_seed(&mut seeds, 0, "sub_0".to_string(), None, Some(0));
        }
        let arch = width_flags(arch_bits(&cs_arch));
        Self { bytes, cs_arch, arch, sections, seeds, imports: Vec::new(), discover_calls: false }
    }

    /// File bytes of the function at `address`, bounded by its size, the next
    /// known function in the same section, and the end of the section.
    fn function_bytes(&self, address: u64, known: &BTreeMap<u64, Candidate>) -> &[u8] {
        let Some(candidate) = known.get(&address) else { return &[] };
        let Some(sec) = candidate.section.and_then(|idx| self.sections.get(idx)) else {
            return &[];
        };
        if address < sec.start || address >= sec.end {
            return &[];
        }

        let mut end = sec.end;
        if let Some(size) = candidate.size {
            end = end.min(address.saturating_add(size));
        }
        if let Some((next, _)) = known
            .range(address.saturating_add(1)..end)
            .find(|(_, other)| other.section == candidate.section)
        {
            end = *next;
        }

        let start = sec.file_offset.saturating_add((address - sec.start) as usize);
        let file_end = sec.file_offset.saturating_add(sec.file_size).min(self.bytes.len());
        let stop = start.saturating_add((end - address) as usize).min(file_end);
        if start >= stop {
            return &[];
        }
        &self.bytes[start..stop]
    }
}

impl CapstoneHost {
    fn decode(
        &self,
        cs: &Capstone,
        code: &[u8],
        address: u64,
        collect_calls: bool,
    ) -> (Vec<String>, Vec<u64>) {
        let mut mnemonics = Vec::new();
        let mut targets = Vec::new();
        if code.is_empty() {
            return (mnemonics, targets);
        }
        let decoded = match self.max_instructions {
            0 => cs.disasm_all(code, address),
            limit => cs.disasm_count(code, address, limit),
        };
        let insns = match decoded {
            Ok(insns) => insns,
            Err(e) => {
                warn!(address, error = %e, "failed to decode function");
                return (mnemonics, targets);
            }
        };
        for i in insns.iter() {
            mnemonics.push(i.mnemonic().unwrap_or("").to_string());
            if !collect_calls {
                continue;
            }
            if let Ok(detail) = cs.insn_detail(i) {
                let is_call = detail
                    .groups()
                    .iter()
                    .any(|g| *g == InsnGroupId(capstone::InsnGroupType::CS_GRP_CALL as u8));
                if is_call {
                    if let Some(target) = decode_call_target(&detail) {
                        targets.push(target);
                    }
                }
            }
        }
        (mnemonics, targets)
    }

    /// Grow the seed set with direct call targets that land in executable sections.
    fn discover(&self, cs: &Capstone) -> BTreeMap<u64, Candidate> {
        let mut known = self.image.seeds.clone();
        let mut pending: Vec<u64> = known.keys().copied().collect();
        let mut scanned = HashSet::new();

        while let Some(address) = pending.pop() {
            if !scanned.insert(address) {
                continue;
            }
            let code = self.image.function_bytes(address, &known);
            let (_, targets) = self.decode(cs, code, address, true);
            for target in targets {
                if known.contains_key(&target) || known.len() >= MAX_DISCOVERED_FUNCTIONS {
                    continue;
                }
                let Some(section) = section_for(&self.image.sections, target) else { continue };
                if !self.image.sections[section].executable {
                    continue;
                }
                insert_seed(&mut known, target, format!("sub_{target:X}"), None, Some(section));
                pending.push(target);
            }
        }
        known
    }
}

impl AnalysisHost for CapstoneHost {
    fn wait_for_analysis(&mut self) -> Result<(), HostError> {
        if self.analysis.is_some() {
            return Ok(());
        }

        let discover = self.image.discover_calls;
        let cs = make_cs(&self.image.cs_arch, discover)?;
        let known = if discover { self.discover(&cs) } else { self.image.seeds.clone() };

        let mut functions = Vec::with_capacity(known.len());
        let mut mnemonics = HashMap::with_capacity(known.len());
        for (address, candidate) in &known {
            let code = self.image.function_bytes(*address, &known);
            let (mnems, _) = self.decode(&cs, code, *address, false);
            if code.is_empty() {
                debug!(function = %candidate.name, address, "function has no file-backed bytes");
            }
            functions.push(FunctionRecord::new(*address, candidate.name.clone()));
            mnemonics.insert(*address, mnems);
        }

        info!(
            arch = %self.image.cs_arch,
            functions = functions.len(),
            seeds = self.image.seeds.len(),
            sections = self.image.sections.len(),
            "analysis complete"
        );
        self.analysis = Some(Analysis { functions, mnemonics });
        Ok(())
    }

    fn arch(&self) -> ArchInfo {
        self.image.arch
    }

    fn import_module_count(&self) -> Result<usize, HostError> {
        Ok(self.image.imports.len())
    }

    fn import_names(
        &self,
        index: usize,
    ) -> Result<Box<dyn Iterator<Item = String> + '_>, HostError> {
        let count = self.image.imports.len();
        let module = self.image.imports.get(index).ok_or(HostError::NoSuchModule { index, count })?;
        debug!(module = %module.name, names = module.names.len(), "enumerating imports");
        Ok(Box::new(module.names.iter().cloned()))
    }

    fn functions(&self) -> Result<Vec<FunctionRecord>, HostError> {
        let analysis = self.analysis.as_ref().ok_or(HostError::AnalysisPending)?;
        Ok(analysis.functions.clone())
    }

    fn function_mnemonics(&self, address: u64) -> Result<Vec<String>, HostError> {
        let analysis = self.analysis.as_ref().ok_or(HostError::AnalysisPending)?;
        analysis.mnemonics.get(&address).cloned().ok_or(HostError::UnknownFunction(address))
    }
}

impl HostBackend for CapstoneBackend {
    fn load(&self, request: &LoadRequest) -> Result<Box<dyn AnalysisHost>, HostError> {
        let bytes = fs::read(&request.binary_path)
            .map_err(|_| HostError::MissingBinary(request.binary_path.clone()))?;
        let image = LoadedImage::parse(bytes, request.arch.as_deref())?;
        debug!(
            path = %request.binary_path.display(),
            arch = %image.cs_arch,
            sections = ?image.sections.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            "image loaded"
        );
        Ok(Box::new(CapstoneHost {
            image,
            max_instructions: request.max_instructions.unwrap_or(DEFAULT_MAX_INSTRUCTIONS),
            analysis: None,
        }))
    }

    fn name(&self) -> &'static str {
        "capstone"
    }

    fn description(&self) -> &'static str {
        "Capstone disassembly of goblin-parsed ELF/PE/Mach-O images (or raw code blobs)"
    }
}
