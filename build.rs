use std::fmt::Write as _;
use std::path::{Path, PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=certs");

    // Compile the root CA candidates from certs/*.pem into the firmware.
    // Ordering follows certs/priority.txt (one file stem per line); the
    // remaining certificates follow alphabetically.
    let out_dir = PathBuf::from(std::env::var("OUT_DIR").unwrap_or_else(|_| ".".into()));
    let certs = collect_certificates(Path::new("certs"));
    if certs.is_empty() {
        println!("cargo:warning=certs/: no root CA certificates found, TLS sessions will not connect");
    }

    let mut generated = String::from("pub static CA_CERTIFICATES: &[CaCertificate] = &[\n");
    for (name, path) in &certs {
        let _ = writeln!(
            generated,
            "    CaCertificate {{ name: {:?}, pem: concat!(include_str!({:?}), \"\\0\") }},",
            name,
            path.display().to_string(),
        );
    }
    generated.push_str("];\n");

    if let Err(e) = std::fs::write(out_dir.join("ca_bundle.rs"), generated) {
        println!("cargo:warning=failed to write ca_bundle.rs: {e}");
    }

    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}

fn collect_certificates(dir: &Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut found: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "pem"))
        .filter_map(|p| {
            let stem = p.file_stem()?.to_str()?.to_owned();
            let abs = std::fs::canonicalize(&p).ok()?;
            Some((stem, abs))
        })
        .collect();
    found.sort_by(|a, b| a.0.cmp(&b.0));

    let priority: Vec<String> = std::fs::read_to_string(dir.join("priority.txt"))
        .unwrap_or_default()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_owned)
        .collect();

    let mut ordered = Vec::with_capacity(found.len());
    for stem in &priority {
        if let Some(pos) = found.iter().position(|(s, _)| s == stem) {
            ordered.push(found.remove(pos));
        }
    }
    ordered.extend(found);

    ordered
        .into_iter()
        .map(|(stem, path)| (stem.replace('_', " "), path))
        .collect()
}
