use chrono::{DateTime, TimeDelta};
use dash_mpd::{AdaptationSet, Period, Representation, SegmentBase, SegmentList, SegmentTemplate, MPD};
use url::Url;

use super::{
    template::{Template, TemplateUrl},
    url::{apply_base_url, merge_baseurls},
    AdaptationSetSnapshot, Addressing, ManifestSnapshot, PeriodSnapshot, RepresentationSnapshot,
};
use crate::{
    timing::{SampleTimeline, TimelineEntry},
    MadoError, MadoResult,
};

impl ManifestSnapshot {
    /// Decodes an MPD document fetched from `mpd_url`.
    pub fn parse(xml: &str, mpd_url: &Url) -> MadoResult<Self> {
        let mpd = dash_mpd::parse(xml)?;
        if mpd.mpdtype.as_deref() != Some("dynamic") {
            tracing::warn!(
                r#type = mpd.mpdtype.as_deref().unwrap_or("static"),
                "MPD is not dynamic, availability windows may be meaningless"
            );
        }
        Self::from_mpd(&mpd, mpd_url)
    }

    pub fn from_mpd(mpd: &MPD, mpd_url: &Url) -> MadoResult<Self> {
        let base_url = apply_base_url(mpd_url, &mpd.base_url)?;

        // Only the first period is decoded, the rest are counted and left alone
        let mut periods = mpd.periods.iter();
        let first = periods.next().ok_or(MadoError::NoPeriodFound)?;
        let ignored_periods = periods.len();
        let start = first
            .start
            .map(TimeDelta::from_std)
            .transpose()?
            .unwrap_or_else(TimeDelta::zero);
        let period = PeriodSnapshot::from_mpd(&base_url, start, first)?;

        Ok(Self {
            availability_start_time: mpd.availabilityStartTime.unwrap_or(DateTime::UNIX_EPOCH),
            publish_time: mpd.publishTime,
            minimum_update_period: mpd
                .minimumUpdatePeriod
                .map(TimeDelta::from_std)
                .transpose()?,
            time_shift_buffer_depth: mpd
                .timeShiftBufferDepth
                .map(TimeDelta::from_std)
                .transpose()?,
            suggested_presentation_delay: mpd
                .suggestedPresentationDelay
                .map(TimeDelta::from_std)
                .transpose()?,
            min_buffer_time: mpd.minBufferTime.map(TimeDelta::from_std).transpose()?,
            period,
            ignored_periods,
        })
    }
}

impl PeriodSnapshot {
    fn from_mpd(base_url: &Url, start: TimeDelta, period: &Period) -> MadoResult<Self> {
        let base_url = apply_base_url(base_url, &period.BaseURL)?;
        let inherited = InheritedAddressingValues {
            segment_base: period.SegmentBase.as_ref(),
            segment_list: period.SegmentList.as_ref(),
            segment_template: period.SegmentTemplate.as_ref(),
        };

        let adaptation_sets = period
            .adaptations
            .iter()
            .map(|adaptation_set| AdaptationSetSnapshot::from_mpd(&base_url, &inherited, adaptation_set))
            .collect::<MadoResult<Vec<_>>>()?;

        Ok(Self {
            id: period.id.clone(),
            start,
            adaptation_sets,
        })
    }
}

impl AdaptationSetSnapshot {
    fn from_mpd(
        base_url: &Url,
        inherited: &InheritedAddressingValues,
        adaptation_set: &AdaptationSet,
    ) -> MadoResult<Self> {
        let base_url = apply_base_url(base_url, &adaptation_set.BaseURL)?;
        let inherited = InheritedAddressingValues {
            segment_base: adaptation_set.SegmentBase.as_ref(),
            segment_list: adaptation_set.SegmentList.as_ref(),
            segment_template: adaptation_set.SegmentTemplate.as_ref(),
        }
        .merge(inherited);

        let representations = adaptation_set
            .representations
            .iter()
            .map(|representation| RepresentationSnapshot::from_mpd(&base_url, &inherited, representation))
            .collect::<MadoResult<Vec<_>>>()?;

        Ok(Self {
            content_type: adaptation_set
                .contentType
                .clone()
                .or_else(|| adaptation_set.mimeType.clone()),
            representations,
        })
    }
}

impl RepresentationSnapshot {
    fn from_mpd(
        base_url: &Url,
        inherited: &InheritedAddressingValues,
        representation: &Representation,
    ) -> MadoResult<Self> {
        let base_url = apply_base_url(base_url, &representation.BaseURL)?;
        let id = representation.id.clone();
        let label = id.as_deref().unwrap_or("<unnamed>");

        let template = match representation.SegmentTemplate.as_ref().or(inherited.segment_template) {
            Some(template) => template,
            None if representation.SegmentBase.is_some() || inherited.segment_base.is_some() => {
                return Err(MadoError::UnsupportedAddressing(format!(
                    "representation {label} uses SegmentBase"
                )))
            }
            None if representation.SegmentList.is_some() || inherited.segment_list.is_some() => {
                return Err(MadoError::UnsupportedAddressing(format!(
                    "representation {label} uses SegmentList"
                )))
            }
            None => {
                return Err(MadoError::UnsupportedAddressing(format!(
                    "representation {label} has no SegmentTemplate"
                )))
            }
        };

        let media = template
            .media
            .as_deref()
            .map(|media| merge_baseurls(&base_url, media))
            .transpose()?
            .map(|u| TemplateUrl(u.to_string()))
            .ok_or_else(|| {
                MadoError::MpdParsing(format!("Missing media template in representation {label}"))
            })?;

        let timescale = template.timescale.unwrap_or(1);
        if timescale == 0 {
            return Err(MadoError::MpdParsing(format!(
                "SegmentTemplate@timescale of representation {label} is zero"
            )));
        }

        Ok(Self {
            addressing: addressing(label, &media, template, timescale)?,
            id,
            bandwidth: representation.bandwidth,
            media,
            start_number: template.startNumber.unwrap_or(1),
        })
    }
}

fn addressing(
    label: &str,
    media: &TemplateUrl,
    template: &SegmentTemplate,
    timescale: u64,
) -> MadoResult<Addressing> {
    if let Some(timeline) = template.SegmentTimeline.as_ref() {
        if !media.contains(Template::TIME) && !media.contains(Template::NUMBER) {
            return Err(MadoError::UnsupportedAddressing(format!(
                "media template of representation {label} has neither $Time$ nor $Number$"
            )));
        }

        return Ok(Addressing::Timeline {
            sample_timeline: SampleTimeline {
                timescale,
                presentation_time_offset: template.presentationTimeOffset.unwrap_or(0),
            },
            entries: timeline
                .segments
                .iter()
                .map(|s| TimelineEntry {
                    time: s.t,
                    duration: s.d,
                    repeat_count: s.r,
                })
                .collect(),
        });
    }

    if !media.contains(Template::NUMBER) {
        return Err(MadoError::UnsupportedAddressing(format!(
            "media template of representation {label} has no $Number$"
        )));
    }
    let duration = template.duration.ok_or_else(|| {
        MadoError::MpdParsing(format!("Missing duration in SegmentTemplate of representation {label}"))
    })?;
    if !(duration > 0.0) {
        return Err(MadoError::MpdParsing(format!(
            "SegmentTemplate@duration of representation {label} is not positive"
        )));
    }

    Ok(Addressing::Number {
        duration,
        timescale,
    })
}

/// Addressing elements a representation inherits from its adaptation set and period.
struct InheritedAddressingValues<'a> {
    segment_base: Option<&'a SegmentBase>,
    segment_list: Option<&'a SegmentList>,
    segment_template: Option<&'a SegmentTemplate>,
}

impl InheritedAddressingValues<'_> {
    fn merge(self, alternate: &Self) -> Self {
        InheritedAddressingValues {
            segment_base: self.segment_base.or(alternate.segment_base),
            segment_list: self.segment_list.or(alternate.segment_list),
            segment_template: self.segment_template.or(alternate.segment_template),
        }
    }
}
