//! Target CPU architecture of packaged functions.

/// CPU architecture a function is built and deployed for.
///
/// Selects the dynamic linker bundled for cross builds, the cross-toolchain
/// helper, and the architecture declared when the function is created.
///
/// # Example
///
/// ```
/// use fnpack_schema::Arch;
///
/// let target: Arch = "aarch64".parse().unwrap();
/// assert_eq!(target.as_str(), "arm64");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// `x86_64` (the platform's default architecture)
    #[default]
    X86_64,
    /// 64-bit ARM (Graviton)
    Arm64,
}

impl Arch {
    /// Get the architecture this process runs on.
    pub fn current() -> Self {
        #[cfg(target_arch = "aarch64")]
        {
            Self::Arm64
        }
        #[cfg(not(target_arch = "aarch64"))]
        {
            Self::X86_64
        }
    }

    /// Platform name (`x86_64` / `arm64`), as used when creating a function.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
        }
    }

    /// GNU target triple used to locate cross-toolchain helpers.
    pub fn gnu_triple(&self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64-linux-gnu",
            Self::Arm64 => "aarch64-linux-gnu",
        }
    }

    /// Absolute path of the glibc dynamic linker for this architecture.
    pub fn dynamic_linker(&self) -> &'static str {
        match self {
            Self::X86_64 => "/lib64/ld-linux-x86-64.so.2",
            Self::Arm64 => "/lib/ld-linux-aarch64.so.1",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "x86_64" | "amd64" | "x86-64" => Ok(Self::X86_64),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            _ => Err(format!("Unknown architecture: {s}")),
        }
    }
}
