use crate::error::LoadError;
use byteorder::{ByteOrder, LittleEndian};

pub const VM_MAGIC: u32 = 0x1272_1444;
/// Second revision of the format, which appends a list of computed-jump targets.
pub const VM_MAGIC_VER2: u32 = 0x1272_1445;

/// Bytes reserved for the program stack at the top of the data segment.
pub const PROGRAM_STACK_SIZE: u32 = 0x10000;
/// Largest data segment a module may declare.
pub const MAX_DATA_SEGMENT: u64 = 1 << 26;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Version {
    V1,
    V2,
}

impl Version {
    pub fn magic(self) -> u32 {
        match self {
            Version::V1 => VM_MAGIC,
            Version::V2 => VM_MAGIC_VER2,
        }
    }

    pub fn header_size(self) -> usize {
        match self {
            Version::V1 => 32,
            Version::V2 => 36,
        }
    }
}

/// Fixed-size image header. All lengths are in bytes except `instruction_count`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: Version,
    pub instruction_count: u32,
    pub code_offset: u32,
    pub code_length: u32,
    pub data_offset: u32,
    pub data_length: u32,
    pub lit_length: u32,
    pub bss_length: u32,
    pub jtrg_length: u32,
}

impl Header {
    /// Parses and bounds-checks the header against the whole image.
    pub fn parse(image: &[u8]) -> Result<Header, LoadError> {
        if image.len() < 4 {
            return Err(LoadError::TooShort {
                len: image.len(),
                needed: Version::V1.header_size(),
            });
        }
        let version = match LittleEndian::read_u32(&image[0..4]) {
            VM_MAGIC => Version::V1,
            VM_MAGIC_VER2 => Version::V2,
            magic => return Err(LoadError::BadMagic(magic)),
        };
        if image.len() < version.header_size() {
            return Err(LoadError::TooShort {
                len: image.len(),
                needed: version.header_size(),
            });
        }

        let field = |index: usize, name: &'static str| -> Result<u32, LoadError> {
            let value = LittleEndian::read_i32(&image[index * 4..index * 4 + 4]);
            if value < 0 {
                Err(LoadError::NegativeField { field: name, value })
            } else {
                Ok(value as u32)
            }
        };

        let header = Header {
            version,
            instruction_count: field(1, "instruction_count")?,
            code_offset: field(2, "code_offset")?,
            code_length: field(3, "code_length")?,
            data_offset: field(4, "data_offset")?,
            data_length: field(5, "data_length")?,
            lit_length: field(6, "lit_length")?,
            bss_length: field(7, "bss_length")?,
            jtrg_length: match version {
                Version::V1 => 0,
                Version::V2 => field(8, "jtrg_length")?,
            },
        };
        header.validate(image.len())?;
        Ok(header)
    }

    fn validate(&self, image_len: usize) -> Result<(), LoadError> {
        let within = |section: &'static str, offset: u64, length: u64| {
            if offset + length > image_len as u64 {
                Err(LoadError::SectionOutOfBounds {
                    section,
                    offset,
                    length,
                    image_len,
                })
            } else {
                Ok(())
            }
        };
        within("code", self.code_offset as u64, self.code_length as u64)?;
        within(
            "data",
            self.data_offset as u64,
            self.data_length as u64 + self.lit_length as u64,
        )?;
        within(
            "jump table",
            self.jump_table_offset(),
            self.jtrg_length as u64,
        )?;

        if self.data_length % 4 != 0 {
            return Err(LoadError::Misaligned {
                section: "data",
                length: self.data_length,
            });
        }
        if self.jtrg_length % 4 != 0 {
            return Err(LoadError::Misaligned {
                section: "jump table",
                length: self.jtrg_length,
            });
        }
        if self.instruction_count == 0 || self.instruction_count > self.code_length {
            return Err(LoadError::BadInstructionCount {
                count: self.instruction_count,
                code_length: self.code_length,
            });
        }

        let declared = self.declared_data_size();
        if declared > MAX_DATA_SEGMENT {
            return Err(LoadError::SegmentTooLarge(declared));
        }
        let stack_bottom = self.segment_size() as i64 - PROGRAM_STACK_SIZE as i64;
        let initialized = self.data_length as i64 + self.lit_length as i64;
        if stack_bottom < initialized {
            return Err(LoadError::StackOverlapsData {
                stack_bottom,
                initialized,
            });
        }
        Ok(())
    }

    pub fn jump_table_offset(&self) -> u64 {
        self.data_offset as u64 + self.data_length as u64 + self.lit_length as u64
    }

    pub fn jump_target_count(&self) -> usize {
        self.jtrg_length as usize / 4
    }

    /// `data + lit + bss`, before rounding.
    pub fn declared_data_size(&self) -> u64 {
        self.data_length as u64 + self.lit_length as u64 + self.bss_length as u64
    }

    /// Size of the data segment: the declared size rounded up to a power of two.
    pub fn segment_size(&self) -> u32 {
        self.declared_data_size().max(1).next_power_of_two() as u32
    }

    /// Serializes the header in its on-disk layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.version.header_size()];
        let fields = [
            self.version.magic(),
            self.instruction_count,
            self.code_offset,
            self.code_length,
            self.data_offset,
            self.data_length,
            self.lit_length,
            self.bss_length,
            self.jtrg_length,
        ];
        for (i, value) in fields.iter().take(out.len() / 4).enumerate() {
            LittleEndian::write_u32(&mut out[i * 4..i * 4 + 4], *value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(version: Version) -> Header {
        let size = version.header_size() as u32;
        Header {
            version,
            instruction_count: 2,
            code_offset: size,
            code_length: 10,
            data_offset: size + 10,
            data_length: 4,
            lit_length: 0,
            bss_length: PROGRAM_STACK_SIZE,
            jtrg_length: 0,
        }
    }

    fn image(h: &Header) -> Vec<u8> {
        let mut bytes = h.to_bytes();
        bytes.resize(h.jump_table_offset() as usize + h.jtrg_length as usize, 0);
        bytes
    }

    #[test]
    fn parses_both_versions() {
        for version in &[Version::V1, Version::V2] {
            let h = header(*version);
            assert_eq!(Header::parse(&image(&h)).unwrap(), h);
        }
    }

    #[test]
    fn segment_is_power_of_two() {
        let h = header(Version::V1);
        assert_eq!(h.segment_size(), 0x20000);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = image(&header(Version::V1));
        bytes[0] ^= 0xff;
        match Header::parse(&bytes) {
            Err(LoadError::BadMagic(_)) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn rejects_truncated_image() {
        let bytes = image(&header(Version::V2));
        assert!(matches!(
            Header::parse(&bytes[..20]),
            Err(LoadError::TooShort { needed: 36, .. })
        ));
        assert!(matches!(
            Header::parse(&bytes[..bytes.len() - 1]),
            Err(LoadError::SectionOutOfBounds { section: "data", .. })
        ));
    }

    #[test]
    fn rejects_negative_lengths() {
        let mut bytes = image(&header(Version::V1));
        LittleEndian::write_i32(&mut bytes[24..28], -4);
        assert!(matches!(
            Header::parse(&bytes),
            Err(LoadError::NegativeField {
                field: "lit_length",
                value: -4
            })
        ));
    }

    #[test]
    fn rejects_stack_overlapping_data() {
        let mut h = header(Version::V1);
        h.bss_length = 0x100;
        assert!(matches!(
            Header::parse(&image(&h)),
            Err(LoadError::StackOverlapsData { .. })
        ));
    }

    #[test]
    fn rejects_oversized_segment() {
        let mut h = header(Version::V1);
        h.bss_length = (MAX_DATA_SEGMENT as u32) + 4;
        assert!(matches!(
            Header::parse(&image(&h)),
            Err(LoadError::SegmentTooLarge(_))
        ));
    }
}
