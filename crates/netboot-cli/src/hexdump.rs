use std::io::{self, Write};

/// Write `data` as 16-byte hex/ASCII lines, labelling each line with its offset from `base`.
pub fn hex_dump<W: Write + ?Sized>(out: &mut W, base: u64, data: &[u8]) -> io::Result<()> {
    for (i, line) in data.chunks(16).enumerate() {
        write!(out, "{:08x} ", base + (i * 16) as u64)?;
        for col in 0..16 {
            match line.get(col) {
                Some(b) => write!(out, " {b:02x}")?,
                None => out.write_all(b"   ")?,
            }
            if col == 7 {
                out.write_all(b" ")?;
            }
        }
        let ascii: String = line
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        writeln!(out, "  |{ascii}|")?;
    }
    Ok(())
}
