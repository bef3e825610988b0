//! Binary dump of final ray directions.
//!
//! Layout (little-endian, f32): wavelength in nm, spectral weight, then one
//! `dx dy dz w` record per ray until end of file. There is no ray-count
//! prefix; readers consume records until EOF.

use crate::Vec3;
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Writes one wavelength's final directions to `path`.
pub fn write_final_directions(
    path: &Path,
    wavelength: f64,
    weight: f64,
    directions: &[(Vec3, f64)],
) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&(wavelength as f32).to_le_bytes())?;
    writer.write_all(&(weight as f32).to_le_bytes())?;
    for (dir, w) in directions {
        writer.write_all(&(dir.x as f32).to_le_bytes())?;
        writer.write_all(&(dir.y as f32).to_le_bytes())?;
        writer.write_all(&(dir.z as f32).to_le_bytes())?;
        writer.write_all(&(*w as f32).to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads a dump file back: `(wavelength, weight, directions)`.
///
/// Records are read until end of file; a truncated record is an error.
pub fn read_final_directions(path: &Path) -> Result<(f64, f64, Vec<(Vec3, f64)>)> {
    let file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let wavelength = read_f32(&mut reader)?
        .ok_or_else(|| anyhow::anyhow!("Empty dump file: {}", path.display()))?;
    let weight = read_f32(&mut reader)?
        .ok_or_else(|| anyhow::anyhow!("Dump file missing weight: {}", path.display()))?;

    let mut directions = Vec::new();
    loop {
        let Some(dx) = read_f32(&mut reader)? else {
            break;
        };
        let (Some(dy), Some(dz), Some(w)) = (
            read_f32(&mut reader)?,
            read_f32(&mut reader)?,
            read_f32(&mut reader)?,
        ) else {
            bail!("Truncated ray record in {}", path.display());
        };
        directions.push((Vec3::new(dx as f64, dy as f64, dz as f64), w as f64));
    }
    Ok((wavelength as f64, weight as f64, directions))
}

/// Reads one little-endian f32; `None` at a clean end of file.
fn read_f32(reader: &mut impl Read) -> Result<Option<f32>> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            bail!("Unexpected end of file inside a value");
        }
        filled += n;
    }
    Ok(Some(f32::from_le_bytes(buf)))
}
