//! The adaptive waveform packet compressor.
//!
//! Each 64-sample packet is encoded with whichever of four schemes produces
//! the fewest bits, discovered by trying each candidate scheme and keeping
//! the cheapest. A scheme tag is written once per channel (all packets of a
//! channel within a shot share one scheme), since in practice a channel's
//! digitizer noise characteristics do not change packet to packet.

use crate::bitstream::{bit_width, BitReader, BitWriter};
use crate::constants::{
    CWF_DELTA_WIDTH_BITS, CWF_OFFSET_BITS, CWF_SAMPLE_BITS, CWF_SCHEME_TAG_BITS, CWF_START_BITS,
    PACKET_SAMPLES,
};
use crate::error::{Error, Result};

/// One digitized 64-sample return packet.
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    /// The packet's position within its channel's digitizing window.
    pub index: u8,
    /// The range, in meters, at which this packet was captured.
    pub range: f64,
    /// The 64 digitized samples, each a value in `0..1024`.
    pub samples: [u16; PACKET_SAMPLES],
}

/// A compression scheme selected for every packet in one channel of one
/// shot.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scheme {
    /// Samples stored uncompressed, 10 bits each.
    Raw,
    /// First differences from the previous sample.
    FirstDifference,
    /// Second differences (differences of differences).
    SecondDifference,
    /// Differences from the corresponding sample in a reference channel's
    /// packet.
    CrossChannel,
}

impl Scheme {
    fn tag(self) -> u64 {
        match self {
            Scheme::Raw => 0,
            Scheme::FirstDifference => 1,
            Scheme::SecondDifference => 2,
            Scheme::CrossChannel => 3,
        }
    }

    fn from_tag(tag: u64) -> Result<Scheme> {
        match tag {
            0 => Ok(Scheme::Raw),
            1 => Ok(Scheme::FirstDifference),
            2 => Ok(Scheme::SecondDifference),
            3 => Ok(Scheme::CrossChannel),
            other => Err(Error::Inconsistent(format!("unknown waveform scheme tag {other}"))),
        }
    }
}

/// Half the range of an 11-bit offset field: offsets are stored as
/// `value + BIAS_11`, so a field can represent `value` in `-1024..=1023`.
const BIAS_11: i64 = 1 << (CWF_OFFSET_BITS - 1);

/// Half the range of a 10-bit first-difference-start field.
const BIAS_10: i64 = 1 << (CWF_START_BITS - 1);

fn first_differences(samples: &[u16; PACKET_SAMPLES]) -> [i32; PACKET_SAMPLES - 1] {
    let mut out = [0i32; PACKET_SAMPLES - 1];
    for i in 0..PACKET_SAMPLES - 1 {
        out[i] = samples[i + 1] as i32 - samples[i] as i32;
    }
    out
}

fn biased_width(values: &[i32], bias: i64, field_max: u64) -> Option<(u32, Vec<u64>)> {
    let mut encoded = Vec::with_capacity(values.len());
    let mut max = 0u64;
    for &v in values {
        let biased = v as i64 + bias;
        if biased < 0 || biased as u64 > field_max {
            return None;
        }
        let biased = biased as u64;
        encoded.push(biased);
        max = max.max(biased);
    }
    Some((bit_width(max), encoded))
}

/// The cost, in bits, of encoding `packet` with each of the four schemes.
/// `None` means the scheme cannot represent this packet's data.
struct Costs {
    raw: u64,
    first_difference: Option<u64>,
    second_difference: Option<u64>,
    cross_channel: Option<u64>,
}

fn costs(packet: &Packet, reference: Option<&Packet>) -> Costs {
    let raw = (PACKET_SAMPLES as u64) * (CWF_SAMPLE_BITS as u64);

    let diffs1 = first_differences(&packet.samples);
    let first_difference = biased_width(&diffs1, BIAS_11, (1 << CWF_OFFSET_BITS) - 1).map(|(width, _)| {
        CWF_START_BITS as u64
            + CWF_OFFSET_BITS as u64
            + CWF_DELTA_WIDTH_BITS as u64
            + (PACKET_SAMPLES as u64 - 1) * width as u64
    });

    let second_difference = second_difference_plan(&diffs1).map(|plan| {
        CWF_START_BITS as u64
            + CWF_START_BITS as u64
            + CWF_OFFSET_BITS as u64
            + CWF_OFFSET_BITS as u64
            + CWF_DELTA_WIDTH_BITS as u64
            + (PACKET_SAMPLES as u64 - 2) * plan.delta_width as u64
    });

    let cross_channel = reference.and_then(|r| {
        let diffs: Vec<i32> = packet
            .samples
            .iter()
            .zip(r.samples.iter())
            .map(|(a, b)| *a as i32 - *b as i32)
            .collect();
        biased_width(&diffs, BIAS_11, (1 << CWF_OFFSET_BITS) - 1)
            .map(|(width, _)| CWF_OFFSET_BITS as u64 + CWF_DELTA_WIDTH_BITS as u64 + PACKET_SAMPLES as u64 * width as u64)
    });

    Costs {
        raw,
        first_difference,
        second_difference,
        cross_channel,
    }
}

struct SecondDifferencePlan {
    first_diff_start: u64,
    second_diffs: Vec<u64>,
    delta_width: u32,
}

fn second_difference_plan(diffs1: &[i32]) -> Option<SecondDifferencePlan> {
    let first_diff_biased = diffs1[0] as i64 + BIAS_10;
    if first_diff_biased < 0 || first_diff_biased as u64 > (1 << CWF_START_BITS) - 1 {
        return None;
    }
    let second_diffs: Vec<i32> = diffs1.windows(2).map(|w| w[1] - w[0]).collect();
    let (delta_width, encoded) = biased_width(&second_diffs, BIAS_11, (1 << CWF_OFFSET_BITS) - 1)?;
    Some(SecondDifferencePlan {
        first_diff_start: first_diff_biased as u64,
        second_diffs: encoded,
        delta_width,
    })
}

/// Picks the cheapest scheme available for `packet`, given an optional
/// reference packet for the cross-channel scheme.
pub fn choose_scheme(packet: &Packet, reference: Option<&Packet>) -> Scheme {
    let costs = costs(packet, reference);
    let mut best = Scheme::Raw;
    let mut best_cost = costs.raw;
    for (cost, scheme) in [
        (costs.first_difference, Scheme::FirstDifference),
        (costs.second_difference, Scheme::SecondDifference),
        (costs.cross_channel, Scheme::CrossChannel),
    ] {
        if let Some(cost) = cost {
            if cost < best_cost {
                best_cost = cost;
                best = scheme;
            }
        }
    }
    best
}

fn add_cost(total: Option<u64>, cost: Option<u64>) -> Option<u64> {
    match (total, cost) {
        (Some(t), Some(c)) => Some(t + c),
        _ => None,
    }
}

/// Picks the cheapest scheme for an entire channel, since a channel writes
/// one scheme tag that governs every packet in it. A scheme is ineligible
/// for the channel unless it can represent every one of `packets`, so this
/// sums each scheme's cost across the whole channel rather than deciding
/// from a single packet (a later packet's own data, not just the first
/// packet's, can rule a scheme out).
pub fn choose_channel_scheme(packets: &[Packet], reference_channel: Option<&[Packet]>) -> Scheme {
    let mut raw_total = 0u64;
    let mut first_difference_total = Some(0u64);
    let mut second_difference_total = Some(0u64);
    let mut cross_channel_total = Some(0u64);

    for packet in packets {
        let reference = reference_channel.and_then(|rc| rc.iter().find(|r| r.index == packet.index));
        let cost = costs(packet, reference);
        raw_total += cost.raw;
        first_difference_total = add_cost(first_difference_total, cost.first_difference);
        second_difference_total = add_cost(second_difference_total, cost.second_difference);
        cross_channel_total = add_cost(cross_channel_total, cost.cross_channel);
    }

    let mut best = Scheme::Raw;
    let mut best_cost = raw_total;
    for (total, scheme) in [
        (first_difference_total, Scheme::FirstDifference),
        (second_difference_total, Scheme::SecondDifference),
        (cross_channel_total, Scheme::CrossChannel),
    ] {
        if let Some(total) = total {
            if total < best_cost {
                best_cost = total;
                best = scheme;
            }
        }
    }
    best
}

/// Encodes `packet`'s samples with `scheme` into `writer`. `reference` must
/// be `Some` when `scheme` is [`Scheme::CrossChannel`].
pub fn encode_packet(writer: &mut BitWriter, packet: &Packet, scheme: Scheme, reference: Option<&Packet>) -> Result<()> {
    match scheme {
        Scheme::Raw => {
            for &sample in &packet.samples {
                writer.write_bits(sample as u64, CWF_SAMPLE_BITS)?;
            }
        }
        Scheme::FirstDifference => {
            let diffs1 = first_differences(&packet.samples);
            let (delta_width, encoded) = biased_width(&diffs1, BIAS_11, (1 << CWF_OFFSET_BITS) - 1)
                .ok_or_else(|| Error::Inconsistent("first-difference scheme cannot represent packet".to_string()))?;
            writer.write_bits(packet.samples[0] as u64, CWF_START_BITS)?;
            writer.write_bits(BIAS_11 as u64, CWF_OFFSET_BITS)?;
            writer.write_bits(delta_width as u64, CWF_DELTA_WIDTH_BITS)?;
            for value in encoded {
                writer.write_bits(value, delta_width)?;
            }
        }
        Scheme::SecondDifference => {
            let diffs1 = first_differences(&packet.samples);
            let plan = second_difference_plan(&diffs1)
                .ok_or_else(|| Error::Inconsistent("second-difference scheme cannot represent packet".to_string()))?;
            writer.write_bits(packet.samples[0] as u64, CWF_START_BITS)?;
            writer.write_bits(plan.first_diff_start, CWF_START_BITS)?;
            writer.write_bits(0, CWF_OFFSET_BITS)?; // reserved
            writer.write_bits(BIAS_11 as u64, CWF_OFFSET_BITS)?;
            writer.write_bits(plan.delta_width as u64, CWF_DELTA_WIDTH_BITS)?;
            for value in plan.second_diffs {
                writer.write_bits(value, plan.delta_width)?;
            }
        }
        Scheme::CrossChannel => {
            let reference = reference.ok_or_else(|| {
                Error::Inconsistent("cross-channel scheme requires a reference packet".to_string())
            })?;
            let diffs: Vec<i32> = packet
                .samples
                .iter()
                .zip(reference.samples.iter())
                .map(|(a, b)| *a as i32 - *b as i32)
                .collect();
            let (delta_width, encoded) = biased_width(&diffs, BIAS_11, (1 << CWF_OFFSET_BITS) - 1)
                .ok_or_else(|| Error::Inconsistent("cross-channel scheme cannot represent packet".to_string()))?;
            writer.write_bits(BIAS_11 as u64, CWF_OFFSET_BITS)?;
            writer.write_bits(delta_width as u64, CWF_DELTA_WIDTH_BITS)?;
            for value in encoded {
                writer.write_bits(value, delta_width)?;
            }
        }
    }
    Ok(())
}

/// Decodes one packet's samples from `reader`, given the scheme that
/// governs this channel and, for the cross-channel scheme, the already
/// decoded reference packet's samples.
pub fn decode_packet(reader: &mut BitReader, scheme: Scheme, reference: Option<&[u16; PACKET_SAMPLES]>) -> Result<[u16; PACKET_SAMPLES]> {
    let mut samples = [0u16; PACKET_SAMPLES];
    match scheme {
        Scheme::Raw => {
            for sample in samples.iter_mut() {
                *sample = reader.read_bits(CWF_SAMPLE_BITS)? as u16;
            }
        }
        Scheme::FirstDifference => {
            let start = reader.read_bits(CWF_START_BITS)? as i32;
            let offset = reader.read_bits(CWF_OFFSET_BITS)? as i64 - BIAS_11;
            let delta_width = reader.read_bits(CWF_DELTA_WIDTH_BITS)? as u32;
            samples[0] = start as u16;
            let mut previous = start;
            for sample in samples.iter_mut().skip(1) {
                let encoded = reader.read_bits(delta_width)? as i64;
                let diff = encoded - offset;
                previous += diff as i32;
                *sample = previous as u16;
            }
        }
        Scheme::SecondDifference => {
            let start = reader.read_bits(CWF_START_BITS)? as i32;
            let first_diff_start = reader.read_bits(CWF_START_BITS)? as i64 - BIAS_10;
            let _reserved = reader.read_bits(CWF_OFFSET_BITS)?;
            let offset = reader.read_bits(CWF_OFFSET_BITS)? as i64 - BIAS_11;
            let delta_width = reader.read_bits(CWF_DELTA_WIDTH_BITS)? as u32;
            samples[0] = start as u16;
            let mut previous = start;
            let mut previous_diff = first_diff_start as i32;
            samples[1] = (previous + previous_diff) as u16;
            previous = samples[1] as i32;
            for sample in samples.iter_mut().skip(2) {
                let encoded = reader.read_bits(delta_width)? as i64;
                let second_diff = encoded - offset;
                previous_diff += second_diff as i32;
                previous += previous_diff;
                *sample = previous as u16;
            }
        }
        Scheme::CrossChannel => {
            let reference = reference.ok_or_else(|| {
                Error::Inconsistent("cross-channel scheme requires a reference packet".to_string())
            })?;
            let offset = reader.read_bits(CWF_OFFSET_BITS)? as i64 - BIAS_11;
            let delta_width = reader.read_bits(CWF_DELTA_WIDTH_BITS)? as u32;
            for (i, sample) in samples.iter_mut().enumerate() {
                let encoded = reader.read_bits(delta_width)? as i64;
                let diff = encoded - offset;
                *sample = (reference[i] as i64 + diff) as u16;
            }
        }
    }
    Ok(samples)
}

/// Encodes `scheme`'s 3-bit tag.
pub fn write_scheme_tag(writer: &mut BitWriter, scheme: Scheme) -> Result<()> {
    writer.write_bits(scheme.tag(), CWF_SCHEME_TAG_BITS)
}

/// Decodes a 3-bit scheme tag.
pub fn read_scheme_tag(reader: &mut BitReader) -> Result<Scheme> {
    Scheme::from_tag(reader.read_bits(CWF_SCHEME_TAG_BITS)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(samples: [u16; PACKET_SAMPLES], index: u8) -> Packet {
        Packet { index, range: 100.0, samples }
    }

    fn ramp(start: u16, step: i32) -> [u16; PACKET_SAMPLES] {
        let mut samples = [0u16; PACKET_SAMPLES];
        let mut v = start as i32;
        for sample in samples.iter_mut() {
            *sample = v.clamp(0, 1023) as u16;
            v += step;
        }
        samples
    }

    #[test]
    fn raw_round_trips() {
        let packet = packet([500; PACKET_SAMPLES].map(|_| 500), 0);
        let mut buffer = [0u8; 128];
        let mut writer = BitWriter::new(&mut buffer);
        encode_packet(&mut writer, &packet, Scheme::Raw, None).unwrap();
        let mut reader = BitReader::new(&buffer);
        let decoded = decode_packet(&mut reader, Scheme::Raw, None).unwrap();
        assert_eq!(decoded, packet.samples);
    }

    #[test]
    fn first_difference_round_trips_a_ramp() {
        let samples = ramp(100, 3);
        let packet = packet(samples, 0);
        let mut buffer = [0u8; 128];
        let mut writer = BitWriter::new(&mut buffer);
        encode_packet(&mut writer, &packet, Scheme::FirstDifference, None).unwrap();
        let mut reader = BitReader::new(&buffer);
        let decoded = decode_packet(&mut reader, Scheme::FirstDifference, None).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn second_difference_round_trips_a_smooth_curve() {
        let mut samples = [0u16; PACKET_SAMPLES];
        for (i, sample) in samples.iter_mut().enumerate() {
            *sample = (500.0 + 50.0 * (i as f64 * 0.2).sin()) as u16;
        }
        let packet = packet(samples, 0);
        let mut buffer = [0u8; 256];
        let mut writer = BitWriter::new(&mut buffer);
        encode_packet(&mut writer, &packet, Scheme::SecondDifference, None).unwrap();
        let mut reader = BitReader::new(&buffer);
        let decoded = decode_packet(&mut reader, Scheme::SecondDifference, None).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn cross_channel_round_trips() {
        let reference_samples = ramp(200, 1);
        let reference = packet(reference_samples, 0);
        let samples = ramp(210, 1);
        let packet = packet(samples, 0);
        let mut buffer = [0u8; 256];
        let mut writer = BitWriter::new(&mut buffer);
        encode_packet(&mut writer, &packet, Scheme::CrossChannel, Some(&reference)).unwrap();
        let mut reader = BitReader::new(&buffer);
        let decoded = decode_packet(&mut reader, Scheme::CrossChannel, Some(&reference_samples)).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn chooses_raw_for_noise() {
        let mut samples = [0u16; PACKET_SAMPLES];
        for (i, sample) in samples.iter_mut().enumerate() {
            *sample = ((i * 97) % 1024) as u16;
        }
        let packet = packet(samples, 0);
        // Noise should never be cheaper than raw as first/second-difference.
        let scheme = choose_scheme(&packet, None);
        let mut buffer = [0u8; 256];
        let mut writer = BitWriter::new(&mut buffer);
        encode_packet(&mut writer, &packet, scheme, None).unwrap();
        let mut reader = BitReader::new(&buffer);
        let decoded = decode_packet(&mut reader, scheme, None).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn chooses_first_difference_for_a_ramp() {
        let samples = ramp(400, 2);
        let packet = packet(samples, 0);
        assert_eq!(choose_scheme(&packet, None), Scheme::FirstDifference);
    }

    #[test]
    fn channel_scheme_is_ineligible_if_any_packet_rejects_it() {
        let mut smooth = [0u16; PACKET_SAMPLES];
        for (i, sample) in smooth.iter_mut().enumerate() {
            *sample = (500.0 + 50.0 * (i as f64 * 0.2).sin()) as u16;
        }
        let packet0 = packet(smooth, 0);
        // packet1's own first difference is too large for second-difference's
        // 10-bit start field, even though packet0's is fine.
        let mut jump = [900u16; PACKET_SAMPLES];
        jump[0] = 0;
        let packet1 = packet(jump, 1);

        assert!(second_difference_plan(&first_differences(&packet0.samples)).is_some());
        assert!(second_difference_plan(&first_differences(&packet1.samples)).is_none());

        let scheme = choose_channel_scheme(&[packet0.clone(), packet1.clone()], None);
        assert_ne!(scheme, Scheme::SecondDifference);

        let mut buffer = [0u8; 512];
        let mut writer = BitWriter::new(&mut buffer);
        encode_packet(&mut writer, &packet0, scheme, None).unwrap();
        encode_packet(&mut writer, &packet1, scheme, None).unwrap();
        let mut reader = BitReader::new(&buffer);
        let decoded0 = decode_packet(&mut reader, scheme, None).unwrap();
        let decoded1 = decode_packet(&mut reader, scheme, None).unwrap();
        assert_eq!(decoded0, packet0.samples);
        assert_eq!(decoded1, packet1.samples);
    }
}
