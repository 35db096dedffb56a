//! Sony ELF boot image decode and encode.
//!
//! Sony devices wrap the boot payloads in an ELF32 container: one
//! program header per payload, with the segment's role recorded in
//! `p_flags` (kernel = 0, ramdisk = 0x80000000, ipl = 0x40000000,
//! rpm = 0x01000000, appsbl = 0x02000000) and the kernel command line
//! carried in a note-typed segment. Some images append a `SIN!` trailer
//! after the last segment; it is preserved verbatim across a round trip.

use flashpatch_core::BinBuf;

use crate::{align_up, fixed_string, BootImage, BootImageError};

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_ARM: u16 = 40;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

const PT_LOAD: u32 = 1;
/// Note-typed segment carrying the kernel command line.
const PT_NOTE: u32 = 4;

/// Segment role tags, recorded in `p_flags`.
const FLAG_KERNEL: u32 = 0;
const FLAG_RAMDISK: u32 = 0x8000_0000;
const FLAG_IPL: u32 = 0x4000_0000;
const FLAG_RPM: u32 = 0x0100_0000;
const FLAG_APPSBL: u32 = 0x0200_0000;

/// Trailer magic following the last segment.
const SIN_MAGIC: &[u8; 4] = b"SIN!";

/// Bytes of the trailer kept as the SIN header; the remainder is the
/// SIN payload.
const SIN_HEADER_SIZE: usize = 32;

fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(data[off..off + 2].try_into().expect("bounds checked"))
}

fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(data[off..off + 4].try_into().expect("bounds checked"))
}

#[derive(Debug, Clone, Copy)]
struct ProgramHeader {
    p_type: u32,
    offset: usize,
    vaddr: u32,
    filesz: usize,
    flags: u32,
}

/// Walks the program header table; `None` when the ELF structure does
/// not hold together.
fn program_headers(data: &[u8]) -> Option<Vec<ProgramHeader>> {
    if data.len() < EHDR_SIZE
        || data[..4] != ELF_MAGIC
        || data[4] != ELFCLASS32
        || data[5] != ELFDATA2LSB
    {
        return None;
    }
    let phoff = le_u32(data, 28) as usize;
    let phentsize = le_u16(data, 42) as usize;
    let phnum = le_u16(data, 44) as usize;
    if phnum == 0 || phentsize < PHDR_SIZE {
        return None;
    }
    let table_end = phoff.checked_add(phnum.checked_mul(phentsize)?)?;
    if table_end > data.len() {
        return None;
    }

    let mut headers = Vec::with_capacity(phnum);
    for i in 0..phnum {
        let b = &data[phoff + i * phentsize..];
        let header = ProgramHeader {
            p_type: le_u32(b, 0),
            offset: le_u32(b, 4) as usize,
            vaddr: le_u32(b, 8),
            filesz: le_u32(b, 16) as usize,
            flags: le_u32(b, 24),
        };
        if header.offset.checked_add(header.filesz)? > data.len() {
            return None;
        }
        headers.push(header);
    }
    Some(headers)
}

/// Returns `true` for an ELF32 image carrying at least a kernel and a
/// ramdisk segment.
pub(crate) fn is_valid(data: &[u8]) -> bool {
    let Some(headers) = program_headers(data) else {
        return false;
    };
    let has = |flag: u32| {
        headers
            .iter()
            .any(|h| h.p_type == PT_LOAD && h.flags == flag && h.filesz > 0)
    };
    has(FLAG_KERNEL) && has(FLAG_RAMDISK)
}

/// Decodes a Sony ELF image into the IR.
pub(crate) fn decode(data: &[u8]) -> Result<BootImage, BootImageError> {
    let headers = program_headers(data).ok_or(BootImageError::SonyMalformed {
        context: "program header table",
    })?;

    let mut image = BootImage {
        entrypoint_addr: le_u32(data, 24),
        ..BootImage::default()
    };
    let mut segments_end = 0usize;

    for header in &headers {
        let content = &data[header.offset..header.offset + header.filesz];
        segments_end = segments_end.max(header.offset + header.filesz);
        if header.p_type == PT_NOTE {
            image.cmdline = fixed_string(content);
            continue;
        }
        if header.p_type != PT_LOAD {
            continue;
        }
        match header.flags {
            FLAG_KERNEL => {
                image.kernel = BinBuf::from_slice(content);
                image.kernel_addr = header.vaddr;
            }
            FLAG_RAMDISK => {
                image.ramdisk = BinBuf::from_slice(content);
                image.ramdisk_addr = header.vaddr;
            }
            FLAG_IPL => {
                image.ipl = BinBuf::from_slice(content);
                image.ipl_addr = header.vaddr;
            }
            FLAG_RPM => {
                image.rpm = BinBuf::from_slice(content);
                image.rpm_addr = header.vaddr;
            }
            FLAG_APPSBL => {
                image.appsbl = BinBuf::from_slice(content);
                image.appsbl_addr = header.vaddr;
            }
            _ => {}
        }
    }

    if image.kernel.is_empty() {
        return Err(BootImageError::SonyMissingSegment("kernel"));
    }
    if image.ramdisk.is_empty() {
        return Err(BootImageError::SonyMissingSegment("ramdisk"));
    }
    image.hdr_kernel_size = u32::try_from(image.kernel.len()).unwrap_or(u32::MAX);
    image.hdr_ramdisk_size = u32::try_from(image.ramdisk.len()).unwrap_or(u32::MAX);

    // Optional SIN trailer after the last segment.
    let trailer = &data[segments_end.min(data.len())..];
    if trailer.len() >= SIN_MAGIC.len() && trailer[..4] == *SIN_MAGIC {
        let split = SIN_HEADER_SIZE.min(trailer.len());
        image.sony_sin_hdr = BinBuf::from_slice(&trailer[..split]);
        image.sony_sin = BinBuf::from_slice(&trailer[split..]);
    }

    Ok(image)
}

/// Encodes the IR as a Sony ELF image.
pub(crate) fn encode(image: &BootImage) -> Result<Vec<u8>, BootImageError> {
    if image.kernel.is_empty() {
        return Err(BootImageError::SonyMissingSegment("kernel"));
    }
    if image.ramdisk.is_empty() {
        return Err(BootImageError::SonyMissingSegment("ramdisk"));
    }

    // Canonical segment order; absent payloads are skipped.
    let mut segments: Vec<(u32, u32, u32, &[u8])> = vec![
        (PT_LOAD, FLAG_KERNEL, image.kernel_addr, &image.kernel),
        (PT_LOAD, FLAG_RAMDISK, image.ramdisk_addr, &image.ramdisk),
    ];
    if !image.ipl.is_empty() {
        segments.push((PT_LOAD, FLAG_IPL, image.ipl_addr, &image.ipl));
    }
    if !image.rpm.is_empty() {
        segments.push((PT_LOAD, FLAG_RPM, image.rpm_addr, &image.rpm));
    }
    if !image.appsbl.is_empty() {
        segments.push((PT_LOAD, FLAG_APPSBL, image.appsbl_addr, &image.appsbl));
    }
    let cmdline = image.cmdline.as_bytes();
    if !cmdline.is_empty() {
        segments.push((PT_NOTE, 0, 0, cmdline));
    }

    let phnum = segments.len();
    let mut offset = EHDR_SIZE + phnum * PHDR_SIZE;
    let mut placed = Vec::with_capacity(phnum);
    for (p_type, flags, vaddr, content) in &segments {
        offset = align_up(offset, 4);
        placed.push((*p_type, *flags, *vaddr, offset, *content));
        offset += content.len();
    }

    let mut out = Vec::with_capacity(offset);
    out.extend_from_slice(&ELF_MAGIC);
    out.push(ELFCLASS32);
    out.push(ELFDATA2LSB);
    out.push(1); // EV_CURRENT
    out.resize(16, 0);
    out.extend_from_slice(&ET_EXEC.to_le_bytes());
    out.extend_from_slice(&EM_ARM.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes()); // e_version
    out.extend_from_slice(&image.entrypoint_addr.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u32).to_le_bytes()); // e_phoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
    out.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&u16::try_from(phnum).unwrap_or(u16::MAX).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
    out.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
    debug_assert_eq!(out.len(), EHDR_SIZE);

    for (p_type, flags, vaddr, seg_offset, content) in &placed {
        out.extend_from_slice(&p_type.to_le_bytes());
        out.extend_from_slice(&u32::try_from(*seg_offset).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&vaddr.to_le_bytes()); // p_vaddr
        out.extend_from_slice(&vaddr.to_le_bytes()); // p_paddr
        out.extend_from_slice(&u32::try_from(content.len()).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&u32::try_from(content.len()).unwrap_or(u32::MAX).to_le_bytes());
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&4u32.to_le_bytes()); // p_align
    }

    for (_, _, _, seg_offset, content) in &placed {
        out.resize(*seg_offset, 0);
        out.extend_from_slice(content);
    }

    if !image.sony_sin_hdr.is_empty() {
        out.extend_from_slice(&image.sony_sin_hdr);
        out.extend_from_slice(&image.sony_sin);
    }

    Ok(out)
}
