//! Recording modalities bundled per session or epoch

use crate::error::{EphysError, EphysResult};
use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of recorded signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Local field potential
    Lfp,
    /// Multi-unit activity
    Mua,
    /// Binned spike trains
    Spikes,
}

impl Modality {
    pub const ALL: [Modality; 3] = [Modality::Lfp, Modality::Mua, Modality::Spikes];

    /// Lowercase name used as the first segment of summary keys
    pub fn name(self) -> &'static str {
        match self {
            Modality::Lfp => "lfp",
            Modality::Mua => "mua",
            Modality::Spikes => "spikes",
        }
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Optional LFP, MUA and spike signals sharing a trial axis
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Modalities {
    pub lfp: Option<Signal>,
    pub mua: Option<Signal>,
    pub spikes: Option<Signal>,
}

impl Modalities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lfp(mut self, lfp: Signal) -> Self {
        self.lfp = Some(lfp);
        self
    }

    pub fn with_mua(mut self, mua: Signal) -> Self {
        self.mua = Some(mua);
        self
    }

    pub fn with_spikes(mut self, spikes: Signal) -> Self {
        self.spikes = Some(spikes);
        self
    }

    pub fn get(&self, modality: Modality) -> Option<&Signal> {
        match modality {
            Modality::Lfp => self.lfp.as_ref(),
            Modality::Mua => self.mua.as_ref(),
            Modality::Spikes => self.spikes.as_ref(),
        }
    }

    pub fn get_mut(&mut self, modality: Modality) -> Option<&mut Signal> {
        match modality {
            Modality::Lfp => self.lfp.as_mut(),
            Modality::Mua => self.mua.as_mut(),
            Modality::Spikes => self.spikes.as_mut(),
        }
    }

    /// Present signals in LFP, MUA, spikes order
    pub fn iter(&self) -> impl Iterator<Item = (Modality, &Signal)> {
        Modality::ALL
            .into_iter()
            .filter_map(move |modality| self.get(modality).map(|signal| (modality, signal)))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Fail with [`EphysError::MissingSignal`] when nothing is present
    pub fn require_any(&self) -> EphysResult<()> {
        if self.is_empty() {
            Err(EphysError::MissingSignal)
        } else {
            Ok(())
        }
    }

    /// Apply `f` to every present signal
    pub fn try_map<F>(&self, mut f: F) -> EphysResult<Modalities>
    where
        F: FnMut(Modality, &Signal) -> EphysResult<Signal>,
    {
        let mut mapped = Modalities::new();
        for (modality, signal) in self.iter() {
            let result = f(modality, signal)?;
            match modality {
                Modality::Lfp => mapped.lfp = Some(result),
                Modality::Mua => mapped.mua = Some(result),
                Modality::Spikes => mapped.spikes = Some(result),
            }
        }
        Ok(mapped)
    }
}
