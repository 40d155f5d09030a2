// ABOUTME: Tar helpers for moving single files in and out of sandboxes
// ABOUTME: Packs in-memory bytes into a one-entry archive and unpacks the first regular file

use std::io::{self, Read};
use tar::{Archive, Builder, Header};

/// Build a tar archive holding one regular file named `name`
pub fn pack_single_file(name: &str, content: &[u8]) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);

    builder.append_data(&mut header, name, content)?;
    builder.into_inner()
}

/// Return the name and bytes of the first regular file in a tar archive.
///
/// `Ok(None)` when the archive has no regular file entries (e.g. a directory).
pub fn unpack_first_file(data: &[u8]) -> io::Result<Option<(String, Vec<u8>)>> {
    let mut archive = Archive::new(data);

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = entry
            .path()?
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        return Ok(Some((name, content)));
    }

    Ok(None)
}
