//! Firmware file formats
use std::path::Path;
use std::str;

use anyhow::Result;
use ihex::Record;
use object::{
    Endianness, elf::FileHeader32, elf::PT_LOAD, read::elf::FileHeader, read::elf::ProgramHeader,
};

use crate::constants::{BYTES_PER_RECORD, ERASED_BYTE};
use crate::error::IspError;
use crate::image::MemoryImage;

/// Intel HEX end-of-file record
pub const EOF_RECORD: &str = ":00000001FF";

/// Segments linked above this address belong to the data, EEPROM or fuse spaces.
const ELF_FLASH_LIMIT: u64 = 0x80_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    PlainHex,
    IntelHex,
    ELF,
    Binary,
}

pub fn read_firmware_from_file<P: AsRef<Path>>(path: P) -> Result<MemoryImage> {
    let p = path.as_ref();
    let raw = std::fs::read(p).map_err(|source| IspError::Io {
        path: p.to_path_buf(),
        source,
    })?;

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::PlainHex => MemoryImage::from_bytes(0, &read_hex(&raw)?),
        FirmwareFormat::IntelHex => parse_ihex(str::from_utf8(&raw)?),
        FirmwareFormat::ELF => objcopy_image(&raw),
        FirmwareFormat::Binary => MemoryImage::from_bytes(0, &raw),
    }
}

pub fn write_hex_file<P: AsRef<Path>>(path: P, text: &str) -> Result<()> {
    let p = path.as_ref();
    std::fs::write(p, text).map_err(|source| IspError::Io {
        path: p.to_path_buf(),
        source,
    })?;
    log::info!("Wrote {} ({} records)", p.display(), text.lines().count());
    Ok(())
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihe", "h86", "hex", "a43", "a90"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }

    if raw.starts_with(&[0x7f, b'E', b'L', b'F']) {
        FirmwareFormat::ELF
    } else if raw.first() == Some(&b':')
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::IntelHex
    } else if !raw.is_empty()
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::PlainHex
    } else {
        FirmwareFormat::Binary
    }
}

pub fn read_hex(data: &[u8]) -> Result<Vec<u8>> {
    let digits: Vec<u8> = data
        .iter()
        .copied()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    Ok(hex::decode(digits)?)
}

/// Parse Intel HEX text into a sparse image.
///
/// Every record's checksum is validated; a corrupt line fails the whole
/// file rather than programming damaged data. Lines not starting with ':'
/// are skipped and nothing after the end-of-file record is read.
pub fn parse_ihex(data: &str) -> Result<MemoryImage> {
    let mut base_address = 0u32;
    let mut image = MemoryImage::new();
    for (n, line) in data.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !line.starts_with(':') {
            log::debug!("line {}: skipping non-record text", n + 1);
            continue;
        }
        let record = Record::from_record_string(line).map_err(|e| IspError::InvalidRecord {
            line: n + 1,
            reason: e.to_string(),
        })?;
        use Record::*;
        match record {
            Data { offset, value } => image
                .extend(base_address + offset as u32, &value)
                .map_err(|e| IspError::InvalidRecord {
                    line: n + 1,
                    reason: e.to_string(),
                })?,
            EndOfFile => break,
            ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            StartSegmentAddress { .. } => (),
            ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            StartLinearAddress(_) => (),
        }
    }
    Ok(image)
}

fn push_record(out: &mut String, record: Record) -> Result<()> {
    out.push_str(&record.to_record_string()?);
    out.push('\n');
    Ok(())
}

/// One data record line (without line terminator).
pub fn encode_record(address: u16, data: &[u8]) -> Result<String> {
    Ok(Record::Data {
        offset: address,
        value: data.to_vec(),
    }
    .to_record_string()?)
}

/// Serialize a sparse image: consecutive bytes are packed into records of up
/// to 16 bytes, followed by the end-of-file record.
pub fn encode_image(image: &MemoryImage) -> Result<String> {
    let mut out = String::new();
    let mut upper = 0u16;
    for (start, data) in image.runs() {
        let mut address = u64::from(start);
        let mut rest = &data[..];
        while !rest.is_empty() {
            let segment = (address >> 16) as u16;
            if segment != upper {
                push_record(&mut out, Record::ExtendedLinearAddress(segment))?;
                upper = segment;
            }
            // a record must not wrap the 64KiB window
            let room = (0x1_0000 - (address & 0xffff)) as usize;
            let (head, tail) = rest.split_at(rest.len().min(BYTES_PER_RECORD).min(room));
            push_record(
                &mut out,
                Record::Data {
                    offset: address as u16,
                    value: head.to_vec(),
                },
            )?;
            address += head.len() as u64;
            rest = tail;
        }
    }
    push_record(&mut out, Record::EndOfFile)?;
    Ok(out)
}

/// Serialize a full device read, starting at address 0.
///
/// Records stop at the highest byte that is not 0xFF; the record holding it
/// is shortened to end there. An all-0xFF device yields only the end-of-file
/// record.
pub fn encode_dump(memory: &[u8]) -> Result<String> {
    let mut out = String::new();
    match memory.iter().rposition(|&b| b != ERASED_BYTE) {
        Some(last) => {
            for (n, chunk) in memory[..=last].chunks(BYTES_PER_RECORD).enumerate() {
                push_record(
                    &mut out,
                    Record::Data {
                        offset: (n * BYTES_PER_RECORD) as u16,
                        value: chunk.to_vec(),
                    },
                )?;
            }
            log::info!("Dump shortened to 0x{:04x}", last);
        }
        None => log::info!("Device flash is blank"),
    }
    push_record(&mut out, Record::EndOfFile)?;
    Ok(out)
}

/// Simulates `objcopy -O ihex` for the flash segments of an ELF file.
pub fn objcopy_image(elf_data: &[u8]) -> Result<MemoryImage> {
    let file_kind = object::FileKind::parse(elf_data)?;

    match file_kind {
        object::FileKind::Elf32 => (),
        _ => anyhow::bail!("cannot read file as ELF32 format"),
    }
    let elf_header = FileHeader32::<Endianness>::parse(elf_data)?;
    let endian = elf_header.endian()?;

    let mut image = MemoryImage::new();
    for segment in elf_header.program_headers(endian, elf_data)? {
        // Physical (load) address: .data initializers live in flash after .text
        let p_paddr: u64 = segment.p_paddr(endian).into();
        let segment_data = segment
            .data(endian, elf_data)
            .map_err(|_| anyhow::format_err!("Failed to access data for an ELF segment."))?;
        if segment_data.is_empty() || segment.p_type(endian) != PT_LOAD {
            continue;
        }
        if p_paddr >= ELF_FLASH_LIMIT {
            log::warn!(
                "Skipping non-flash segment at {:#08x} ({} bytes)",
                p_paddr,
                segment_data.len()
            );
            continue;
        }
        log::info!(
            "Found loadable segment, physical address: {:#06x}, size: {:#x}",
            p_paddr,
            segment_data.len()
        );
        image.extend(p_paddr as u32, segment_data)?;
    }

    if image.is_empty() {
        anyhow::bail!("empty ELF file");
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn record_sum(line: &str) -> u8 {
        hex::decode(&line[1..])
            .unwrap()
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    #[test]
    fn record_checksum() {
        let line = encode_record(0x0010, &[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(line, ":03001000010203E7");
        assert_eq!(record_sum(&line), 0);
    }

    #[test]
    fn eof_record_checksum() {
        assert_eq!(Record::EndOfFile.to_record_string().unwrap(), EOF_RECORD);
    }

    #[test]
    fn parse_data_and_stop_at_eof() {
        let text = ":0400000001020304F2\n:00000001FF\n:01001000559A\n";
        let image = parse_ihex(text).unwrap();
        assert_eq!(image.len(), 4);
        assert_eq!(image.get(3), Some(0x04));
        assert_eq!(image.get(0x10), None);
    }

    #[test]
    fn parse_skips_noise_and_accepts_lowercase() {
        let text = "# comment\n\r\n:02200a000bbc0d\r\n:00000001ff\n";
        let image = parse_ihex(text).unwrap();
        assert_eq!(image.iter().collect::<Vec<_>>(), vec![(0x200a, 0x0b), (0x200b, 0xbc)]);
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let text = ":0400000001020304F2\n:03001000010203E8\n:00000001FF\n";
        let err = parse_ihex(text).unwrap_err();
        match IspError::of(&err) {
            Some(e @ IspError::InvalidRecord { line: 2, .. }) => {
                assert_eq!(e.kind(), ErrorKind::Image)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_extended_linear_address() {
        let text = ":020000040001F9\n:01000400AA51\n:00000001FF\n";
        let image = parse_ihex(text).unwrap();
        assert_eq!(image.get(0x1_0004), Some(0xaa));
    }

    #[test]
    fn last_byte_of_address_space() {
        let text = ":02000004FFFFFC\n:01FFFF00AA57\n:00000001FF\n";
        let image = parse_ihex(text).unwrap();
        assert_eq!(image.get(u32::MAX), Some(0xaa));
        assert_eq!(encode_image(&image).unwrap(), text);
    }

    #[test]
    fn record_past_address_space_is_rejected() {
        let text = ":02000004FFFFFC\n:02FFFF00AABB9B\n:00000001FF\n";
        let err = parse_ihex(text).unwrap_err();
        assert!(matches!(
            IspError::of(&err),
            Some(IspError::InvalidRecord { line: 2, .. })
        ));
    }

    #[test]
    fn dump_shortening() {
        let mut memory = vec![0xffu8; 1024];
        memory[..6].copy_from_slice(&[0x0e, 0xc0, 0x1d, 0xc0, 0x1c, 0xc0]);
        let text = encode_dump(&memory).unwrap();
        assert_eq!(text, ":060000000EC01DC01CC073\n:00000001FF\n");
    }

    #[test]
    fn dump_truncates_straddling_record() {
        let mut memory = vec![0xffu8; 64];
        memory[0] = 0x00;
        memory[17] = 0x11;
        let text = encode_dump(&memory).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with(":10000000"));
        assert!(lines[1].starts_with(":02001000FF11"));
        assert_eq!(lines[2], EOF_RECORD);
    }

    #[test]
    fn blank_dump_is_eof_only() {
        assert_eq!(encode_dump(&[0xff; 1024]).unwrap(), ":00000001FF\n");
    }

    #[test]
    fn dump_text_round_trips() {
        let mut memory = vec![0xffu8; 1024];
        for (i, b) in memory[..100].iter_mut().enumerate() {
            *b = i as u8;
        }
        let text = encode_dump(&memory).unwrap();
        let image = parse_ihex(&text).unwrap();
        assert_eq!(image, MemoryImage::from_bytes(0, &memory[..100]).unwrap());
        assert_eq!(encode_image(&image).unwrap(), text);
    }

    #[test]
    fn random_images_round_trip() {
        use rand::Rng;

        let mut rng = rand::rng();
        for _ in 0..20 {
            let image: MemoryImage = (0..rng.random_range(0..300))
                .map(|_| (rng.random_range(0..1024u32), rng.random::<u8>()))
                .collect();
            assert_eq!(parse_ihex(&encode_image(&image).unwrap()).unwrap(), image);
        }
    }

    #[test]
    fn encode_image_splits_runs() {
        let mut image = MemoryImage::from_bytes(0, &[0xaa; 20]).unwrap();
        image.insert(0x40, 0x55);
        let text = encode_image(&image).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with(":10000000"));
        assert!(lines[1].starts_with(":04001000"));
        assert_eq!(lines[2], ":01004000556A");
    }

    #[test]
    fn encode_image_emits_extended_address() {
        let image = MemoryImage::from_bytes(0x1_0004, &[0xaa]).unwrap();
        assert_eq!(encode_image(&image).unwrap(), ":020000040001F9\n:01000400AA51\n:00000001FF\n");
    }

    #[test]
    fn format_guessing() {
        assert_eq!(guess_format(Path::new("a.hex"), b"xx"), FirmwareFormat::IntelHex);
        assert_eq!(guess_format(Path::new("a"), b":00000001FF\n"), FirmwareFormat::IntelHex);
        assert_eq!(guess_format(Path::new("a"), b"\x7fELF\x01"), FirmwareFormat::ELF);
        assert_eq!(guess_format(Path::new("a"), b"0ec01dc0\n"), FirmwareFormat::PlainHex);
        assert_eq!(guess_format(Path::new("a.bin"), &[0x0e, 0xc0]), FirmwareFormat::Binary);
        assert_eq!(guess_format(Path::new("a"), b""), FirmwareFormat::Binary);
    }

    #[test]
    fn plain_hex_ignores_whitespace() {
        assert_eq!(read_hex(b"0ec0\r\n1dc0\n").unwrap(), vec![0x0e, 0xc0, 0x1d, 0xc0]);
    }
}
