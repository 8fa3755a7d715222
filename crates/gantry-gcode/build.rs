use std::{
    env,
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

type Result<T, E = Box<dyn std::error::Error>> = std::result::Result<T, E>;

/// Each sample gets one test per transcript kind.
const KINDS: [(&str, &str); 2] = [
    ("tokens", "snapshot_tokens_from_str"),
    ("parsed", "snapshot_from_str"),
];

fn main() -> Result<()> {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR")?);
    let root = manifest_dir.join("test-data");
    println!("cargo:rerun-if-changed={}", root.display());

    let mut samples = Vec::new();
    collect_samples(&root, &mut samples)?;
    samples.sort();

    let mut buffer = String::new();
    writeln!(buffer, "use insta::assert_snapshot;")?;
    writeln!(
        buffer,
        "use crate::testing::{{snapshot_from_str, snapshot_tokens_from_str}};"
    )?;

    for path in samples {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sample");
        let ident = test_ident(stem);
        let input = unix_path(path.strip_prefix(&manifest_dir)?);
        let snapshot_dir = path
            .parent()
            .and_then(|p| p.strip_prefix(&manifest_dir).ok())
            .map(unix_path)
            .unwrap_or_else(|| "test-data".to_string());

        for (kind, helper) in KINDS {
            writeln!(buffer)?;
            writeln!(buffer, "#[test]")?;
            writeln!(buffer, "fn snapshot_{ident}_{kind}() {{")?;
            writeln!(
                buffer,
                "    let input = include_str!(concat!(env!(\"CARGO_MANIFEST_DIR\"), \"/{input}\"));"
            )?;
            writeln!(buffer, "    let snapshot = {helper}(input);")?;
            writeln!(
                buffer,
                "    insta::with_settings!({{snapshot_path => concat!(env!(\"CARGO_MANIFEST_DIR\"), \"/{snapshot_dir}\"), prepend_module_to_snapshot => false}}, {{"
            )?;
            writeln!(buffer, "        assert_snapshot!(\"{stem}.{kind}\", snapshot);")?;
            writeln!(buffer, "    }});")?;
            writeln!(buffer, "}}")?;
        }
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    fs::write(out_dir.join("generated_tests.rs"), buffer)?;
    Ok(())
}

fn test_ident(stem: &str) -> String {
    let mut ident: String = stem
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect();
    if ident.is_empty() || ident.starts_with(|c: char| c.is_ascii_digit()) {
        ident.insert(0, '_');
    }
    ident
}

fn unix_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn is_sample(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("gcode" | "nc" | "ngc")
    )
}

fn collect_samples(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            println!("cargo:rerun-if-changed={}", path.display());
            collect_samples(&path, out)?;
        } else if is_sample(&path) {
            println!("cargo:rerun-if-changed={}", path.display());
            out.push(path);
        }
    }
    Ok(())
}
