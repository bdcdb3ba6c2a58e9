//! Little-endian field codec shared by message and packet serialization
//!
//! Strings are written as a 7-bit varint byte length followed by UTF-8 bytes.

use crate::math::{Quat, Vec2, Vec3};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// Upper bound on a decoded string, guards against hostile length prefixes
const MAX_STRING_LEN: usize = 1024;

pub trait WireWrite: WriteBytesExt {
    fn write_bool(&mut self, value: bool) -> io::Result<()> {
        self.write_u8(value as u8)
    }

    fn write_f32_le(&mut self, value: f32) -> io::Result<()> {
        self.write_f32::<LittleEndian>(value)
    }

    fn write_vec2(&mut self, v: Vec2) -> io::Result<()> {
        self.write_f32_le(v.x)?;
        self.write_f32_le(v.y)
    }

    fn write_vec3(&mut self, v: Vec3) -> io::Result<()> {
        self.write_f32_le(v.x)?;
        self.write_f32_le(v.y)?;
        self.write_f32_le(v.z)
    }

    fn write_quat(&mut self, q: Quat) -> io::Result<()> {
        self.write_f32_le(q.x)?;
        self.write_f32_le(q.y)?;
        self.write_f32_le(q.z)?;
        self.write_f32_le(q.w)
    }

    fn write_string(&mut self, value: &str) -> io::Result<()> {
        let mut len = value.len();
        loop {
            let mut byte = (len & 0x7F) as u8;
            len >>= 7;
            if len != 0 {
                byte |= 0x80;
            }
            self.write_u8(byte)?;
            if len == 0 {
                break;
            }
        }
        self.write_all(value.as_bytes())
    }
}

impl<W: io::Write + ?Sized> WireWrite for W {}

pub trait WireRead: ReadBytesExt {
    fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_f32_le(&mut self) -> io::Result<f32> {
        self.read_f32::<LittleEndian>()
    }

    fn read_vec2(&mut self) -> io::Result<Vec2> {
        Ok(Vec2::new(self.read_f32_le()?, self.read_f32_le()?))
    }

    fn read_vec3(&mut self) -> io::Result<Vec3> {
        Ok(Vec3::new(
            self.read_f32_le()?,
            self.read_f32_le()?,
            self.read_f32_le()?,
        ))
    }

    fn read_quat(&mut self) -> io::Result<Quat> {
        Ok(Quat::new(
            self.read_f32_le()?,
            self.read_f32_le()?,
            self.read_f32_le()?,
            self.read_f32_le()?,
        ))
    }

    fn read_string(&mut self) -> io::Result<String> {
        let mut len = 0usize;
        let mut shift = 0;
        loop {
            let byte = self.read_u8()?;
            len |= ((byte & 0x7F) as usize) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 28 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "string length prefix too long",
                ));
            }
        }

        if len > MAX_STRING_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("string of {} bytes exceeds limit", len),
            ));
        }

        let mut bytes = vec![0u8; len];
        self.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl<R: io::Read + ?Sized> WireRead for R {}
