use std::fmt::{Display, Formatter};

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetTriple {
    pub architecture: Architecture,
    pub vendor: Vendor,
    pub operating_system: OperatingSystem,
}

impl TargetTriple {
    pub fn new(
        architecture: Architecture,
        vendor: Vendor,
        operating_system: OperatingSystem,
    ) -> Self {
        Self {
            architecture,
            vendor,
            operating_system,
        }
    }

    pub fn parse(s: &str) -> Result<Self, InvalidTriple> {
        let mut triple = s.split('-');

        let arch = Architecture::parse(triple.next().ok_or(InvalidTriple::InvalidFormat(s))?)?;
        let vendor = Vendor::parse(triple.next().ok_or(InvalidTriple::InvalidFormat(s))?)?;
        let os = OperatingSystem::parse(triple.next().ok_or(InvalidTriple::InvalidFormat(s))?)?;

        if triple.next().is_some() {
            return Err(InvalidTriple::InvalidFormat(s));
        }

        if vendor == Vendor::Apple && os != OperatingSystem::MacOs {
            return Err(InvalidTriple::InvalidCombination);
        }

        Ok(Self::new(arch, vendor, os))
    }

    /// Returns the width of a pointer in bytes.
    pub fn pointer_bytes(&self) -> usize {
        self.architecture.pointer_bytes()
    }
}

impl Display for TargetTriple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.architecture, self.vendor, self.operating_system
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    X86,
    X86_64,
}

impl Architecture {
    fn parse(s: &str) -> Result<Self, InvalidTriple> {
        match s {
            "x86" | "i386" | "i686" => Ok(Self::X86),
            "x86_64" | "amd64" => Ok(Self::X86_64),
            _ => Err(InvalidTriple::ArchitectureNotSupported),
        }
    }

    pub fn pointer_bytes(self) -> usize {
        match self {
            Self::X86 => 4,
            Self::X86_64 => 8,
        }
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X86 => write!(f, "x86"),
            Self::X86_64 => write!(f, "x86_64"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    Unknown,
    Pc,
    Apple,
}

impl Vendor {
    fn parse(s: &str) -> Result<Self, InvalidTriple> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "pc" => Ok(Self::Pc),
            "apple" => Ok(Self::Apple),
            _ => Err(InvalidTriple::VendorNotSupported),
        }
    }
}

impl Display for Vendor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Pc => write!(f, "pc"),
            Self::Apple => write!(f, "apple"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingSystem {
    Linux,
    MacOs,
    Windows,
}

impl OperatingSystem {
    fn parse(s: &str) -> Result<Self, InvalidTriple> {
        match s {
            "linux" => Ok(Self::Linux),
            "macos" | "darwin" => Ok(Self::MacOs),
            "windows" => Ok(Self::Windows),
            _ => Err(InvalidTriple::OperatingSystemNotSupported),
        }
    }
}

impl Display for OperatingSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::MacOs => write!(f, "macos"),
            Self::Windows => write!(f, "windows"),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum InvalidTriple<'a> {
    #[error("the format of triple must be `architecture-vendor-os`: but got `{0}`")]
    InvalidFormat(&'a str),

    #[error("given architecture is not supported")]
    ArchitectureNotSupported,

    #[error("given vendor is not supported")]
    VendorNotSupported,

    #[error("given operating system is not supported")]
    OperatingSystemNotSupported,

    #[error("given triple consists of invalid combination")]
    InvalidCombination,
}
