use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::TreeSappError;

/// Open a text input for buffered reading. Paths ending in ".gz" are decompressed
/// on the fly.
pub fn open_text_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>, TreeSappError> {
    let path = path.as_ref();
    let f = File::open(path).map_err(|e| TreeSappError::io(path, e))?;

    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    let reader: Box<dyn BufRead> = if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};

    #[test]
    fn test_reads_plain_and_gzipped() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("tax_ids_X.txt");
        std::fs::write(&plain, "1\tA\n").unwrap();

        let gz = dir.path().join("tax_ids_X.txt.gz");
        let mut enc = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        enc.write_all(b"1\tA\n").unwrap();
        enc.finish().unwrap();

        for path in [&plain, &gz] {
            let mut text = String::new();
            open_text_reader(path).unwrap().read_to_string(&mut text).unwrap();
            assert_eq!(text, "1\tA\n");
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = open_text_reader("/nonexistent/placements.jplace").err().unwrap();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }
}
