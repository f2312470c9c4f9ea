//! Fixture compilation
//!
//! The compiler is an external tool; this module only assembles its command
//! line for the requested debug-info layout and reports failures.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;

use crate::common::{Error, Result};

/// Debug-info layout of the built fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Debug info embedded in the executable
    Dwarf,
    /// Debug info split into a `.dSYM` bundle by `dsymutil`
    Dsym,
}

impl BuildMode {
    pub fn all() -> Vec<BuildMode> {
        vec![BuildMode::Dwarf, BuildMode::Dsym]
    }

    /// dSYM bundles only exist on macOS
    pub fn is_supported_on_host(self) -> bool {
        match self {
            BuildMode::Dwarf => true,
            BuildMode::Dsym => cfg!(target_os = "macos"),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildMode::Dwarf => write!(f, "dwarf"),
            BuildMode::Dsym => write!(f, "dsym"),
        }
    }
}

/// Everything needed to compile one fixture
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Directory the compiler runs in; relative paths resolve against it
    pub dir: PathBuf,
    pub sources: Vec<PathBuf>,
    pub output: PathBuf,
    pub compiler: String,
    pub flags: Vec<String>,
}

impl BuildSpec {
    /// Absolute path of the produced executable
    pub fn artifact(&self) -> PathBuf {
        self.dir.join(&self.output)
    }

    /// Object file kept next to the executable for `source`
    fn object(source: &Path) -> String {
        source.with_extension("o").to_string_lossy().into_owned()
    }

    /// Compiler invocations for `mode`, in order
    ///
    /// Dwarf compiles each source to an object file and links in a separate
    /// step; the objects stay on disk. Dsym compiles and links at once and
    /// `dsymutil` runs afterwards.
    pub fn compiler_invocations(&self, mode: BuildMode) -> Vec<Vec<String>> {
        let flags = self.flags.iter().cloned();
        let output = vec!["-o".to_string(), self.output.to_string_lossy().into_owned()];

        match mode {
            BuildMode::Dwarf => {
                let mut steps: Vec<Vec<String>> = self
                    .sources
                    .iter()
                    .map(|source| {
                        let mut args = vec!["-g".to_string(), "-gdwarf".to_string()];
                        args.extend(flags.clone());
                        args.push("-c".to_string());
                        args.push(source.to_string_lossy().into_owned());
                        args.push("-o".to_string());
                        args.push(Self::object(source));
                        args
                    })
                    .collect();

                let mut link: Vec<String> = flags.collect();
                link.extend(self.sources.iter().map(|s| Self::object(s)));
                link.extend(output);
                steps.push(link);
                steps
            }
            BuildMode::Dsym => {
                let mut args = vec!["-g".to_string()];
                args.extend(flags);
                args.extend(self.sources.iter().map(|s| s.to_string_lossy().into_owned()));
                args.extend(output);
                vec![args]
            }
        }
    }

    /// Why this build should not run on this host, if it should not
    ///
    /// libc++ formatter scenarios are not run against GCC dwarf builds.
    pub fn skip_reason(&self, mode: BuildMode) -> Option<String> {
        if !mode.is_supported_on_host() {
            return Some(format!("{} is not supported on this platform", mode));
        }
        if mode == BuildMode::Dwarf && is_gcc(&self.compiler) {
            return Some(format!("{} builds are skipped for GCC ({})", mode, self.compiler));
        }
        None
    }
}

/// Whether `compiler` names a GCC driver such as `g++`, `gcc-12` or
/// `x86_64-linux-gnu-g++`
pub fn is_gcc(compiler: &str) -> bool {
    let name = Path::new(compiler)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = match name.rsplit_once('-') {
        Some((head, version)) if version.chars().all(|c| c.is_ascii_digit() || c == '.') => head,
        _ => name.as_str(),
    };
    !base.contains("clang") && (base.ends_with("g++") || base.ends_with("gcc"))
}

async fn run_tool(dir: &Path, program: &str, args: &[String]) -> Result<()> {
    tracing::debug!(program, ?args, dir = %dir.display(), "Running build tool");

    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::Setup(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Setup(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        )));
    }
    Ok(())
}

/// Compile the fixture and return the executable path
///
/// Failure is reported once and never retried.
#[tracing::instrument(skip(spec), fields(output = %spec.output.display()))]
pub async fn build_target(spec: &BuildSpec, mode: BuildMode) -> Result<PathBuf> {
    if !mode.is_supported_on_host() {
        return Err(Error::Setup(format!(
            "{} builds are not supported on this platform",
            mode
        )));
    }
    if spec.sources.is_empty() {
        return Err(Error::Setup("No sources to build".to_string()));
    }

    for args in spec.compiler_invocations(mode) {
        run_tool(&spec.dir, &spec.compiler, &args).await?;
    }

    let artifact = spec.artifact();
    if mode == BuildMode::Dsym {
        run_tool(
            &spec.dir,
            "dsymutil",
            &[artifact.to_string_lossy().into_owned()],
        )
        .await?;
    }

    if !artifact.exists() {
        return Err(Error::Setup(format!(
            "Build reported success but {} is missing",
            artifact.display()
        )));
    }

    tracing::info!(artifact = %artifact.display(), %mode, "Built fixture");
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dir: &Path, compiler: &str) -> BuildSpec {
        BuildSpec {
            dir: dir.to_path_buf(),
            sources: vec![PathBuf::from("main.cpp")],
            output: PathBuf::from("a.out"),
            compiler: compiler.to_string(),
            flags: vec!["-O0".to_string()],
        }
    }

    #[test]
    fn test_dsym_builds_in_one_step() {
        let steps = spec(Path::new("/tmp"), "clang++").compiler_invocations(BuildMode::Dsym);
        assert_eq!(steps, vec![vec!["-g", "-O0", "main.cpp", "-o", "a.out"]]);
    }

    #[test]
    fn test_dwarf_compiles_then_links() {
        let mut spec = spec(Path::new("/tmp"), "clang++");
        spec.sources.push(PathBuf::from("src/other.cpp"));
        let steps = spec.compiler_invocations(BuildMode::Dwarf);

        assert_eq!(
            steps,
            vec![
                vec!["-g", "-gdwarf", "-O0", "-c", "main.cpp", "-o", "main.o"],
                vec!["-g", "-gdwarf", "-O0", "-c", "src/other.cpp", "-o", "src/other.o"],
                vec!["-O0", "main.o", "src/other.o", "-o", "a.out"],
            ]
        );
    }

    #[test]
    fn test_gcc_detection() {
        for gcc in ["g++", "gcc", "/usr/bin/g++-12", "x86_64-linux-gnu-g++", "gcc-13.2"] {
            assert!(is_gcc(gcc), "{}", gcc);
        }
        for other in ["clang++", "/opt/llvm/bin/clang++-17", "clang", "c++", "icpx"] {
            assert!(!is_gcc(other), "{}", other);
        }
    }

    #[test]
    fn test_skip_reason() {
        let clang = spec(Path::new("/tmp"), "clang++");
        assert_eq!(clang.skip_reason(BuildMode::Dwarf), None);
        assert_eq!(
            clang.skip_reason(BuildMode::Dsym).is_some(),
            !cfg!(target_os = "macos")
        );

        let gcc = spec(Path::new("/tmp"), "g++");
        assert!(gcc.skip_reason(BuildMode::Dwarf).unwrap().contains("GCC"));
    }

    #[test]
    fn test_mode_parsing() {
        let mode: BuildMode = serde_yaml::from_str("dsym").unwrap();
        assert_eq!(mode, BuildMode::Dsym);
        assert_eq!(BuildMode::Dwarf.to_string(), "dwarf");
        assert!(BuildMode::Dwarf.is_supported_on_host());
        assert_eq!(BuildMode::Dsym.is_supported_on_host(), cfg!(target_os = "macos"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_compiler_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_target(&spec(dir.path(), "false"), BuildMode::Dwarf)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Setup(_)));
    }

    #[tokio::test]
    async fn test_missing_compiler_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_target(&spec(dir.path(), "sdbg-no-such-compiler"), BuildMode::Dwarf)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to run"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_without_artifact_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = build_target(&spec(dir.path(), "true"), BuildMode::Dwarf)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }
}
