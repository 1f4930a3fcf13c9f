/// Conda platform subdirectory.
///
/// Every channel publishes one subdir per platform plus the
/// platform-independent `noarch` subdir.
///
/// # Example
///
/// ```
/// use mamba_schema::Platform;
///
/// let current = Platform::current();
/// println!("Solving for: {}", current);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Platform {
    /// Platform-independent packages.
    #[serde(rename = "noarch")]
    NoArch,
    /// Linux on `x86_64`.
    #[serde(rename = "linux-64")]
    Linux64,
    /// Linux on ARM64.
    #[serde(rename = "linux-aarch64")]
    LinuxAarch64,
    /// Linux on little-endian POWER.
    #[serde(rename = "linux-ppc64le")]
    LinuxPpc64le,
    /// macOS on Intel.
    #[serde(rename = "osx-64")]
    Osx64,
    /// macOS on Apple Silicon.
    #[serde(rename = "osx-arm64")]
    OsxArm64,
    /// Windows on `x86_64`.
    #[serde(rename = "win-64")]
    Win64,
}

impl Platform {
    /// The platform this binary was compiled for.
    pub fn current() -> Self {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            Self::OsxArm64
        }
        #[cfg(all(target_os = "macos", not(target_arch = "aarch64")))]
        {
            Self::Osx64
        }
        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        {
            Self::LinuxAarch64
        }
        #[cfg(all(target_os = "linux", target_arch = "powerpc64"))]
        {
            Self::LinuxPpc64le
        }
        #[cfg(all(
            target_os = "linux",
            not(any(target_arch = "aarch64", target_arch = "powerpc64"))
        ))]
        {
            Self::Linux64
        }
        #[cfg(target_os = "windows")]
        {
            Self::Win64
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            Self::NoArch
        }
    }

    /// Subdirectory name as used in channel URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoArch => "noarch",
            Self::Linux64 => "linux-64",
            Self::LinuxAarch64 => "linux-aarch64",
            Self::LinuxPpc64le => "linux-ppc64le",
            Self::Osx64 => "osx-64",
            Self::OsxArm64 => "osx-arm64",
            Self::Win64 => "win-64",
        }
    }

    /// The subdirs searched for this target, most specific first.
    pub fn search_order(self) -> Vec<Platform> {
        if self == Self::NoArch {
            vec![Self::NoArch]
        } else {
            vec![self, Self::NoArch]
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "noarch" => Ok(Self::NoArch),
            "linux-64" => Ok(Self::Linux64),
            "linux-aarch64" => Ok(Self::LinuxAarch64),
            "linux-ppc64le" => Ok(Self::LinuxPpc64le),
            "osx-64" => Ok(Self::Osx64),
            "osx-arm64" => Ok(Self::OsxArm64),
            "win-64" => Ok(Self::Win64),
            _ => Err(format!("Unknown platform: {s}")),
        }
    }
}
