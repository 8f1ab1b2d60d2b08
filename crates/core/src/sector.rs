use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub type MinerId = u64;
pub type SectorNumber = u64;

/// Registered seal proof: selects the sector size and proof parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProofVariant {
    StackedDrg2KiBV1,
    StackedDrg8MiBV1,
    StackedDrg512MiBV1,
    StackedDrg32GiBV1,
    StackedDrg64GiBV1,
}

impl ProofVariant {
    pub const ALL: [ProofVariant; 5] = [
        ProofVariant::StackedDrg2KiBV1,
        ProofVariant::StackedDrg8MiBV1,
        ProofVariant::StackedDrg512MiBV1,
        ProofVariant::StackedDrg32GiBV1,
        ProofVariant::StackedDrg64GiBV1,
    ];

    /// Sector size in bytes.
    pub fn sector_size(&self) -> u64 {
        match self {
            ProofVariant::StackedDrg2KiBV1 => 2 << 10,
            ProofVariant::StackedDrg8MiBV1 => 8 << 20,
            ProofVariant::StackedDrg512MiBV1 => 512 << 20,
            ProofVariant::StackedDrg32GiBV1 => 32 << 30,
            ProofVariant::StackedDrg64GiBV1 => 64 << 30,
        }
    }

    /// Human sector size label used in config files (`2KiB`, `32GiB`, ...).
    pub fn size_label(&self) -> &'static str {
        match self {
            ProofVariant::StackedDrg2KiBV1 => "2KiB",
            ProofVariant::StackedDrg8MiBV1 => "8MiB",
            ProofVariant::StackedDrg512MiBV1 => "512MiB",
            ProofVariant::StackedDrg32GiBV1 => "32GiB",
            ProofVariant::StackedDrg64GiBV1 => "64GiB",
        }
    }
}

impl std::fmt::Display for ProofVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StackedDrg{}V1", self.size_label())
    }
}

impl FromStr for ProofVariant {
    type Err = CoreError;

    /// Accepts either the size label (`32GiB`) or the full name
    /// (`StackedDrg32GiBV1`), case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProofVariant::ALL
            .iter()
            .copied()
            .find(|p| {
                p.size_label().eq_ignore_ascii_case(s) || p.to_string().eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| CoreError::UnknownProofVariant(s.to_string()))
    }
}

/// Miner-scoped sector identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SectorId {
    pub miner: MinerId,
    pub number: SectorNumber,
}

impl SectorId {
    pub fn new(miner: MinerId, number: SectorNumber) -> Self {
        Self { miner, number }
    }
}

impl std::fmt::Display for SectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s-t0{}-{}", self.miner, self.number)
    }
}

/// The unit of sealing work: a sector plus the proof it is sealed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SectorRef {
    pub id: SectorId,
    pub proof: ProofVariant,
}

impl SectorRef {
    pub fn new(miner: MinerId, number: SectorNumber, proof: ProofVariant) -> Self {
        Self {
            id: SectorId::new(miner, number),
            proof,
        }
    }
}

/// One of the files a sector is made of on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectorFileType {
    Unsealed,
    Sealed,
    Cache,
    UpdateSealed,
    UpdateCache,
}

/// Whether fetched files are moved off or copied from their source storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquireMode {
    Move,
    Copy,
}

/// Byte range inside an unpadded sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u64,
}
