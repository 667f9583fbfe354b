//! Merging of freshly fetched snapshots into the live model.
//!
//! The model only ever grows forward: existing segment checks are never replaced,
//! the greatest segment number never decreases and the retained floor only advances.
use chrono::{DateTime, TimeDelta, Utc};

use crate::{
    manifest::{template::Template, Addressing, ManifestSnapshot, RepresentationSnapshot},
    model::{AdaptationSet, AddressingMode, LiveManifest, Period, Representation, SegmentCheck},
    timing::{expand_timeline, SampleTimeline, SegmentTiming, TimeDeltaExt, TimelineEntry},
    MadoError, MadoResult,
};

#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
    /// Corrected local time the snapshot was fetched at.
    pub fetch_time: DateTime<Utc>,
    /// Update period used when the manifest does not announce one.
    pub refresh_ceiling: TimeDelta,
    /// Maximum number of already-available segments kept eligible for probing.
    pub max_retained_past_segments: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub new_segments: usize,
    pub ignored_periods: usize,
    pub publish_time: Option<DateTime<Utc>>,
}

pub fn merge_snapshot(
    manifest: &mut LiveManifest,
    snapshot: &ManifestSnapshot,
    options: &MergeOptions,
) -> MadoResult<MergeReport> {
    let first = &snapshot.period;
    if let Some(expected) = manifest.periods.first().and_then(|p| p.id.as_ref()) {
        if first.id.as_ref() != Some(expected) {
            return Err(MadoError::PeriodIdChanged {
                expected: Some(expected.clone()),
                found: first.id.clone(),
            });
        }
    }

    let ignored_periods = snapshot.ignored_periods;
    if ignored_periods > 0 {
        tracing::warn!(
            ignored = ignored_periods,
            "Multiple periods are not supported, only the first one is validated"
        );
    }

    manifest.availability_start_time = snapshot.availability_start_time;
    manifest.publish_time = snapshot.publish_time;
    manifest.minimum_update_period = snapshot.minimum_update_period;
    manifest.time_shift_buffer_depth = snapshot.effective_time_shift_buffer_depth();
    manifest.suggested_presentation_delay = snapshot.effective_suggested_presentation_delay();
    manifest.min_buffer_time = snapshot.effective_min_buffer_time();
    manifest.fetch_time = Some(options.fetch_time);

    if manifest.periods.is_empty() {
        manifest.periods.push(Period {
            id: first.id.clone(),
            start: first.start,
            adaptation_sets: Vec::new(),
        });
    }
    let period = &mut manifest.periods[0];
    period.id = first.id.clone();
    period.start = first.start;

    let context = MergeContext {
        period_anchor: snapshot.availability_start_time + first.start,
        time_shift_buffer_depth: snapshot.effective_time_shift_buffer_depth(),
        suggested_presentation_delay: snapshot.effective_suggested_presentation_delay(),
        min_buffer_time: snapshot.effective_min_buffer_time(),
        minimum_update_period: snapshot
            .minimum_update_period
            .unwrap_or(options.refresh_ceiling),
        options,
    };

    let mut new_segments = 0;
    for (set_index, set_snapshot) in first.adaptation_sets.iter().enumerate() {
        if period.adaptation_sets.len() <= set_index {
            period.adaptation_sets.push(AdaptationSet::default());
        }
        let set = &mut period.adaptation_sets[set_index];
        set.content_type = set_snapshot.content_type.clone();

        for (index, snapshot) in set_snapshot.representations.iter().enumerate() {
            if set.representations.len() <= index {
                set.representations.push(Representation::new(
                    snapshot.id.clone(),
                    mode_of(&snapshot.addressing),
                    snapshot.start_number,
                ));
            }
            new_segments += context.merge_representation(&mut set.representations[index], snapshot)?;
        }
    }

    Ok(MergeReport {
        new_segments,
        ignored_periods,
        publish_time: snapshot.publish_time,
    })
}

fn mode_of(addressing: &Addressing) -> AddressingMode {
    match addressing {
        Addressing::Number { .. } => AddressingMode::NumberTemplate,
        Addressing::Timeline { .. } => AddressingMode::TimelineTemplate,
    }
}

struct MergeContext<'a> {
    period_anchor: DateTime<Utc>,
    time_shift_buffer_depth: TimeDelta,
    suggested_presentation_delay: TimeDelta,
    min_buffer_time: TimeDelta,
    minimum_update_period: TimeDelta,
    options: &'a MergeOptions,
}

impl MergeContext<'_> {
    fn timing(&self, segment_duration: f64, start_number: u64) -> SegmentTiming {
        SegmentTiming {
            period_anchor: self.period_anchor,
            segment_duration,
            start_number,
            time_shift_buffer_depth: self.time_shift_buffer_depth,
            suggested_presentation_delay: self.suggested_presentation_delay,
            min_buffer_time: self.min_buffer_time,
        }
    }

    fn merge_representation(
        &self,
        representation: &mut Representation,
        snapshot: &RepresentationSnapshot,
    ) -> MadoResult<usize> {
        representation.id = snapshot.id.clone();
        representation.bandwidth = snapshot.bandwidth;
        representation.mode = mode_of(&snapshot.addressing);
        representation.start_number = snapshot.start_number;

        let mut template = Template::new();
        template
            .insert_optional(Template::REPRESENTATION_ID, snapshot.id.clone())
            .insert(Template::BANDWIDTH, snapshot.bandwidth.unwrap_or(0).to_string());

        let added = match &snapshot.addressing {
            Addressing::Number {
                duration,
                timescale,
            } => {
                let timing = self.timing(duration / *timescale as f64, snapshot.start_number);
                self.insert_numbered(representation, snapshot, timing, *duration, &mut template)?
            }
            Addressing::Timeline {
                sample_timeline,
                entries,
            } => self.append_timeline(
                representation,
                snapshot,
                *sample_timeline,
                entries,
                &mut template,
            )?,
        };

        self.advance_floor(representation);

        tracing::debug!(
            representation = representation.id.as_deref(),
            added,
            gsn = representation.greatest_segment_number,
            floor = representation.first_retained_segment,
            "Merged representation"
        );
        Ok(added)
    }

    fn insert_numbered(
        &self,
        representation: &mut Representation,
        snapshot: &RepresentationSnapshot,
        timing: SegmentTiming,
        duration_ticks: f64,
        template: &mut Template,
    ) -> MadoResult<usize> {
        let fetch_time = self.options.fetch_time;
        let start_number = snapshot.start_number;
        representation.segment_duration = timing.segment_duration;

        let latest = timing.latest_segment_number(fetch_time);
        representation.latest_segment_number = u64::try_from(latest).ok();

        let greatest = timing.greatest_segment_number(fetch_time, self.minimum_update_period);
        let Ok(greatest) = u64::try_from(greatest) else {
            return Ok(0);
        };
        if greatest < start_number {
            // the stream has not started yet
            return Ok(0);
        }
        representation.greatest_segment_number = representation.greatest_segment_number.max(greatest);

        let cap_floor = u64::try_from(latest + 1 - self.options.max_retained_past_segments as i64)
            .unwrap_or(0);
        let floor = representation
            .first_retained_segment
            .max(start_number)
            .max(cap_floor);

        let duration = TimeDelta::seconds_f64(timing.segment_duration);
        let mut added = 0;
        for number in floor..=representation.greatest_segment_number {
            if representation.segments.contains_key(&number) {
                continue;
            }

            let time = ((number - start_number) as f64 * duration_ticks) as u64;
            template
                .insert(Template::NUMBER, number.to_string())
                .insert(Template::TIME, time.to_string());
            let location = snapshot.media.resolve(template);

            representation.segments.insert(
                number,
                SegmentCheck::new(
                    number,
                    location,
                    timing.availability_start_time(number),
                    timing.time_shift_buffer_depth,
                    duration,
                ),
            );
            added += 1;
        }

        Ok(added)
    }

    fn append_timeline(
        &self,
        representation: &mut Representation,
        snapshot: &RepresentationSnapshot,
        sample_timeline: SampleTimeline,
        entries: &[TimelineEntry],
        template: &mut Template,
    ) -> MadoResult<usize> {
        let segments = expand_timeline(snapshot.id.as_deref(), entries)?;
        let timing = self.timing(0.0, snapshot.start_number);

        let mut newest = representation
            .segments
            .values()
            .next_back()
            .map(|segment| segment.start.availability_time);
        let mut next_number = if representation.segments.is_empty() {
            snapshot.start_number
        } else {
            representation.greatest_segment_number + 1
        };

        let mut added = 0;
        for segment in segments {
            let availability_start =
                timing.availability_start_at(sample_timeline.offset_of(segment.time));
            if newest.is_some_and(|newest| availability_start <= newest) {
                continue;
            }

            template
                .insert(Template::NUMBER, next_number.to_string())
                .insert(Template::TIME, segment.time.to_string());
            let location = snapshot.media.resolve(template);
            let duration = sample_timeline.duration_of(segment.duration);

            representation.segments.insert(
                next_number,
                SegmentCheck::new(
                    next_number,
                    location,
                    availability_start,
                    timing.time_shift_buffer_depth,
                    duration,
                ),
            );
            representation.greatest_segment_number = next_number;
            representation.segment_duration = duration.as_seconds_f64();
            newest = Some(availability_start);
            next_number += 1;
            added += 1;
        }

        representation.latest_segment_number = representation
            .segments
            .iter()
            .rev()
            .find(|(_, segment)| segment.start.availability_time < self.options.fetch_time)
            .map(|(number, _)| *number);

        Ok(added)
    }

    /// Raises the retained floor past segments whose availability has ended and
    /// past the oldest already-available segments beyond the retention cap.
    fn advance_floor(&self, representation: &mut Representation) {
        let horizon = self.options.fetch_time - self.time_shift_buffer_depth;

        let mut floor = representation.first_retained_segment;
        if let Some(&newest) = representation.segments.keys().next_back() {
            floor = newest + 1;
            for (number, segment) in representation
                .segments
                .range(representation.first_retained_segment..)
                .rev()
            {
                if segment.end.availability_time < horizon {
                    break;
                }
                floor = *number;
            }
        }

        if let Some(latest) = representation.latest_segment_number {
            let cap = self.options.max_retained_past_segments;
            if latest >= floor && latest - floor + 1 > cap {
                floor = latest + 1 - cap;
            }
        }

        representation.first_retained_segment = floor
            .max(representation.first_retained_segment)
            .max(representation.start_number)
            .min(representation.greatest_segment_number + 1);
    }
}
