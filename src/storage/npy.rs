use anyhow::{Context, Result};
use ndarray::{ArrayBase, Data, Dimension};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const MAGIC: &[u8] = b"\x93NUMPY";
const ALIGN: usize = 64;

/// Header of a version 1.0 `.npy` file holding little-endian f64 in C order
fn header(shape: &[usize]) -> Vec<u8> {
    let dims = match shape {
        [single] => format!("({},)", single),
        _ => format!(
            "({})",
            shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    let mut dict = format!(
        "{{'descr': '<f8', 'fortran_order': False, 'shape': {}, }}",
        dims
    );

    // magic + version + u16 length + dict + '\n' must be a multiple of ALIGN
    let fixed = MAGIC.len() + 2 + 2;
    let total = fixed + dict.len() + 1;
    let padding = (ALIGN - total % ALIGN) % ALIGN;
    dict.push_str(&" ".repeat(padding));
    dict.push('\n');

    let mut out = Vec::with_capacity(fixed + dict.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out
}

pub fn write_npy<S, D>(path: &Path, array: &ArrayBase<S, D>) -> Result<()>
where
    S: Data<Elem = f64>,
    D: Dimension,
{
    let file =
        File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(&header(array.shape()))?;
    for value in array.iter() {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(())
}
