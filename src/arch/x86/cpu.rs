//! CPU feature detection, used to pick the fastest syscall entry mechanism
//! the running CPU actually supports.

use raw_cpuid::CpuId;

#[derive(Debug, Clone, Copy)]
pub struct CpuFeatures {
    pub vendor: CpuVendor,
    pub has_sysenter: bool,
    pub has_syscall: bool,
    pub has_pae: bool,
    pub has_apic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuVendor {
    Intel,
    Amd,
    Other,
}

/// Reads CPUID once at boot. There's no hot path that needs this more than
/// once: the running CPU's feature set doesn't change.
pub fn detect() -> CpuFeatures {
    let cpuid = CpuId::new();

    let vendor = match cpuid.get_vendor_info().map(|v| v.as_str().to_owned()) {
        Some(ref s) if s == "GenuineIntel" => CpuVendor::Intel,
        Some(ref s) if s == "AuthenticAMD" => CpuVendor::Amd,
        _ => CpuVendor::Other,
    };

    let feature_info = cpuid.get_feature_info();
    let has_sysenter = feature_info.as_ref().map(|f| f.has_sysenter_sysexit()).unwrap_or(false);
    let has_pae = feature_info.as_ref().map(|f| f.has_pae()).unwrap_or(false);
    let has_apic = feature_info.as_ref().map(|f| f.has_apic()).unwrap_or(false);

    // SYSCALL/SYSRET is advertised through the extended feature leaf and,
    // on Intel, is only usable in long mode; this kernel runs in 32-bit
    // protected mode, so even when the bit is set syscall_entry treats it
    // as unusable and degrades to `int 0x80`.
    let has_syscall = cpuid
        .get_extended_processor_and_feature_identifiers()
        .map(|f| f.has_syscall_sysret())
        .unwrap_or(false);

    CpuFeatures { vendor, has_sysenter, has_syscall, has_pae, has_apic }
}
