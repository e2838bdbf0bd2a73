use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Things the solver never does itself: callers load kernels, render
/// results and own the process.
const CALLER_OWNED: &[(&str, &str)] = &[
    ("std::fs", "kernel loading"),
    ("File::", "kernel loading"),
    ("std::io::stdin", "interactive input"),
    ("println!", "result reporting"),
    ("print!(", "result reporting"),
    ("dbg!(", "result reporting"),
    ("process::exit", "process lifecycle"),
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let mut sources = Vec::new();
    if let Err(err) = collect_rust_sources(Path::new("src"), &mut sources) {
        panic!("cannot scan src/ for the solver I/O boundary: {err}");
    }
    sources.sort();

    let mut leaks = Vec::new();
    for path in &sources {
        println!("cargo:rerun-if-changed={}", path.display());
        let Ok(text) = fs::read_to_string(path) else {
            continue;
        };
        for (line_no, line) in text.lines().enumerate() {
            if line.trim_start().starts_with("//") {
                continue;
            }
            for (token, concern) in CALLER_OWNED {
                if line.contains(token) {
                    leaks.push(format!(
                        "{}:{}: `{token}` ({concern} belongs to callers)",
                        path.display(),
                        line_no + 1
                    ));
                }
            }
        }
    }

    if !leaks.is_empty() {
        panic!(
            "umkl solver modules reach outside the library boundary:\n  {}",
            leaks.join("\n  ")
        );
    }
}

fn collect_rust_sources(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_rust_sources(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}
