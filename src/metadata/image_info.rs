//! Brightness unit and restoring beam(s) from the table keywords.

use log::{debug, warn};

use super::{
    star_index, BeamRecord, KeywordsRecord, MetadataError, QuantityRecord, RestoringBeamRecord,
};

/// A value with a unit, exactly as the table stored it.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub value: f64,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Beam {
    pub major: Quantity,
    pub minor: Quantity,
    /// Position angle.
    pub pa: Quantity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BeamInfo {
    None,

    /// One beam for every plane.
    Single(Beam),

    /// One beam per spectral plane, ordered by channel.
    PerPlane(Vec<Beam>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageInfo {
    /// The brightness unit, e.g. "Jy/beam".
    pub units: Option<String>,

    pub beam: BeamInfo,
}

impl ImageInfo {
    pub(crate) fn from_keywords(keywords: &KeywordsRecord) -> Result<ImageInfo, MetadataError> {
        let beam = match keywords
            .imageinfo
            .as_ref()
            .and_then(|i| i.restoringbeam.as_ref())
        {
            None => {
                warn!("No beam information found in CASA image");
                BeamInfo::None
            }

            Some(RestoringBeamRecord::Single(b)) => BeamInfo::Single(Beam::from(b)),

            Some(RestoringBeamRecord::PerPlane {
                beams,
                n_channels,
                n_stokes,
            }) => {
                if *n_stokes > 1 {
                    return Err(MetadataError::MultiStokesBeams(*n_stokes));
                }

                let mut planes = Vec::with_capacity(beams.len());
                for (key, stokes) in beams {
                    let chan = star_index(key).ok_or_else(|| MetadataError::BadBeamKey(key.clone()))?;
                    // Only one Stokes plane; it's always "*0".
                    let beam = stokes
                        .get("*0")
                        .ok_or_else(|| MetadataError::BadBeamKey(format!("{key}/*0")))?;
                    planes.push((chan, Beam::from(beam)));
                }
                if planes.len() != *n_channels {
                    return Err(MetadataError::BeamCountMismatch {
                        expected: *n_channels,
                        got: planes.len(),
                    });
                }
                planes.sort_unstable_by_key(|(chan, _)| *chan);
                debug!("Found {} per-plane restoring beams", planes.len());

                BeamInfo::PerPlane(planes.into_iter().map(|(_, b)| b).collect())
            }
        };

        Ok(ImageInfo {
            units: keywords.units.clone(),
            beam,
        })
    }
}

impl From<&QuantityRecord> for Quantity {
    fn from(q: &QuantityRecord) -> Self {
        Quantity {
            value: q.value,
            unit: q.unit.clone(),
        }
    }
}

impl From<&BeamRecord> for Beam {
    fn from(b: &BeamRecord) -> Self {
        Beam {
            major: Quantity::from(&b.major),
            minor: Quantity::from(&b.minor),
            pa: Quantity::from(&b.positionangle),
        }
    }
}
