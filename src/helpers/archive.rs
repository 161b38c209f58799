use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::Path;

const SKIPPED: &[&str] = &[".git"];

/// Pack a checkout into a gzipped tarball to submit as the build context.
/// Version control metadata is left out.
pub fn pack_build_context(root: &Path) -> Result<Vec<u8>, String> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut archive = tar::Builder::new(encoder);
    archive.follow_symlinks(false);

    let entries = std::fs::read_dir(root).map_err(|err| format!("read checkout: {}", err))?;
    for entry in entries {
        let entry = entry.map_err(|err| format!("read checkout entry: {}", err))?;
        let name = entry.file_name();
        if SKIPPED.iter().any(|skip| name == *skip) {
            continue;
        }
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|err| format!("stat {}: {}", path.display(), err))?;
        let result = if file_type.is_dir() {
            archive.append_dir_all(&name, &path)
        } else {
            archive.append_path_with_name(&path, &name)
        };
        result.map_err(|err| format!("archive {}: {}", path.display(), err))?;
    }

    archive
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(|err| format!("finish archive: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;

    #[test]
    fn git_directory_is_excluded() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/index.js"), "console.log(1)").unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();

        let bytes = pack_build_context(dir.path()).unwrap();
        let mut archive = tar::Archive::new(GzDecoder::new(bytes.as_slice()));
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
            .collect();

        assert!(names.iter().any(|n| n == "package.json"));
        assert!(names.iter().any(|n| n == "src/index.js"));
        assert!(!names.iter().any(|n| n.starts_with(".git")));
    }
}
