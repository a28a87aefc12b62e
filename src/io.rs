//! Field-dump binary codec (spec §6): a fixed 351-byte header followed
//! by raw nodal data, one record per field.
//!
//! The teacher writes field dumps through the `hdf5-interface` git
//! dependency; that container format has no notion of the exact 351-byte
//! fixed-header layout spec §6 requires, so this module replaces it with
//! a small hand-rolled codec over `byteorder`, matching how the original
//! semtex writer works (a fixed ASCII header block, then binary data) but
//! without taking on a format (HDF5) that can't represent it. The dropped
//! `hdf5-interface` dependency is recorded in `DESIGN.md`.

use std::io::{Read, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{alert, Result, Severity};

pub const HEADER_BYTES: usize = 351;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    fn native() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }
}

/// Fixed 351-byte field-dump header. Field names are ASCII, padded with
/// NUL bytes out to the listed widths; everything else is packed
/// little/big-endian per `endianness`.
#[derive(Debug, Clone)]
pub struct DumpHeader {
    pub session: [u8; 64],
    pub created: [u8; 32],
    pub n_p: u32,
    pub n_z: u32,
    pub n_el: u32,
    pub step: u32,
    pub time: f64,
    pub dt: f64,
    pub viscosity: f64,
    /// Field names present in this dump, one ASCII char each, e.g. "uvp".
    pub fields: [u8; 16],
    pub endianness: Endianness,
    /// Padding out to exactly [`HEADER_BYTES`].
    _reserved: [u8; 351 - 64 - 32 - 4 * 4 - 8 * 3 - 16 - 1],
}

impl DumpHeader {
    pub fn new(session: &str, created: &str, n_p: u32, n_z: u32, n_el: u32, step: u32, time: f64, dt: f64, viscosity: f64, fields: &str) -> Self {
        let mut session_buf = [0u8; 64];
        let bytes = session.as_bytes();
        session_buf[..bytes.len().min(64)].copy_from_slice(&bytes[..bytes.len().min(64)]);
        let mut created_buf = [0u8; 32];
        let cbytes = created.as_bytes();
        created_buf[..cbytes.len().min(32)].copy_from_slice(&cbytes[..cbytes.len().min(32)]);
        let mut fields_buf = [0u8; 16];
        let fbytes = fields.as_bytes();
        fields_buf[..fbytes.len().min(16)].copy_from_slice(&fbytes[..fbytes.len().min(16)]);
        DumpHeader {
            session: session_buf,
            created: created_buf,
            n_p,
            n_z,
            n_el,
            step,
            time,
            dt,
            viscosity,
            fields: fields_buf,
            endianness: Endianness::native(),
            _reserved: [0u8; 351 - 64 - 32 - 4 * 4 - 8 * 3 - 16 - 1],
        }
    }

    pub fn n_fields(&self) -> usize {
        self.fields.iter().take_while(|&&b| b != 0).count()
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.session)?;
        w.write_all(&self.created)?;
        let flag = match self.endianness {
            Endianness::Little => 0u8,
            Endianness::Big => 1u8,
        };
        match self.endianness {
            Endianness::Little => {
                w.write_u32::<LittleEndian>(self.n_p)?;
                w.write_u32::<LittleEndian>(self.n_z)?;
                w.write_u32::<LittleEndian>(self.n_el)?;
                w.write_u32::<LittleEndian>(self.step)?;
                w.write_f64::<LittleEndian>(self.time)?;
                w.write_f64::<LittleEndian>(self.dt)?;
                w.write_f64::<LittleEndian>(self.viscosity)?;
            }
            Endianness::Big => {
                w.write_u32::<BigEndian>(self.n_p)?;
                w.write_u32::<BigEndian>(self.n_z)?;
                w.write_u32::<BigEndian>(self.n_el)?;
                w.write_u32::<BigEndian>(self.step)?;
                w.write_f64::<BigEndian>(self.time)?;
                w.write_f64::<BigEndian>(self.dt)?;
                w.write_f64::<BigEndian>(self.viscosity)?;
            }
        }
        w.write_all(&self.fields)?;
        w.write_all(&[flag])?;
        w.write_all(&self._reserved)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let routine = "DumpHeader::read_from";
        let mut session = [0u8; 64];
        r.read_exact(&mut session)?;
        let mut created = [0u8; 32];
        r.read_exact(&mut created)?;
        // Peek the endianness flag by reading the fixed-width numeric
        // block twice is wasteful; instead read little-endian first and
        // fix up after the flag byte is known, matching semtex's own
        // "read native, byte-swap if the magic looks wrong" convention.
        let mut numeric = [0u8; 4 * 4 + 8 * 3];
        r.read_exact(&mut numeric)?;
        let mut fields = [0u8; 16];
        r.read_exact(&mut fields)?;
        let mut flag = [0u8; 1];
        r.read_exact(&mut flag)?;
        let endianness = match flag[0] {
            0 => Endianness::Little,
            1 => Endianness::Big,
            _ => {
                alert(routine, "unrecognised endianness flag in dump header", Severity::Error)?;
                Endianness::Little
            }
        };
        let mut reserved = [0u8; 351 - 64 - 32 - 4 * 4 - 8 * 3 - 16 - 1];
        r.read_exact(&mut reserved)?;

        let mut cursor = std::io::Cursor::new(&numeric[..]);
        let (n_p, n_z, n_el, step, time, dt, viscosity) = match endianness {
            Endianness::Little => (
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_u32::<LittleEndian>()?,
                cursor.read_f64::<LittleEndian>()?,
                cursor.read_f64::<LittleEndian>()?,
                cursor.read_f64::<LittleEndian>()?,
            ),
            Endianness::Big => (
                cursor.read_u32::<BigEndian>()?,
                cursor.read_u32::<BigEndian>()?,
                cursor.read_u32::<BigEndian>()?,
                cursor.read_u32::<BigEndian>()?,
                cursor.read_f64::<BigEndian>()?,
                cursor.read_f64::<BigEndian>()?,
                cursor.read_f64::<BigEndian>()?,
            ),
        };

        Ok(DumpHeader {
            session,
            created,
            n_p,
            n_z,
            n_el,
            step,
            time,
            dt,
            viscosity,
            fields,
            endianness,
            _reserved: reserved,
        })
    }
}

/// Write one field's raw nodal data (row-major `n_z * plane_size`
/// doubles) in the header's endianness.
pub fn write_field_data<W: Write>(w: &mut W, data: &ndarray::Array2<f64>, endianness: Endianness) -> Result<()> {
    for &v in data.iter() {
        match endianness {
            Endianness::Little => w.write_f64::<LittleEndian>(v)?,
            Endianness::Big => w.write_f64::<BigEndian>(v)?,
        }
    }
    Ok(())
}

pub fn read_field_data<R: Read>(r: &mut R, n_z: usize, plane_size: usize, endianness: Endianness) -> Result<ndarray::Array2<f64>> {
    let mut data = ndarray::Array2::<f64>::zeros((n_z, plane_size));
    for v in data.iter_mut() {
        *v = match endianness {
            Endianness::Little => r.read_f64::<LittleEndian>()?,
            Endianness::Big => r.read_f64::<BigEndian>()?,
        };
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_exactly_351_bytes() {
        let header = DumpHeader::new("s", "now", 7, 1, 4, 0, 0.0, 0.001, 0.01, "uvp");
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_BYTES);
    }

    #[test]
    fn header_round_trips() {
        let header = DumpHeader::new("mysession", "2026-07-27", 9, 8, 16, 12345, 1.5, 0.0025, 0.02, "uvwp");
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let parsed = DumpHeader::read_from(&mut cursor).unwrap();
        assert_eq!(parsed.n_p, 9);
        assert_eq!(parsed.n_z, 8);
        assert_eq!(parsed.n_el, 16);
        assert_eq!(parsed.step, 12345);
        assert!((parsed.time - 1.5).abs() < 1e-12);
        assert_eq!(parsed.n_fields(), 4);
    }

    #[test]
    fn field_data_round_trips() {
        let data = ndarray::Array2::from_shape_fn((2, 3), |(i, j)| (i * 3 + j) as f64 * 1.5);
        let mut buf = Vec::new();
        write_field_data(&mut buf, &data, Endianness::Little).unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let parsed = read_field_data(&mut cursor, 2, 3, Endianness::Little).unwrap();
        assert_eq!(parsed, data);
    }
}
