use crate::bitstream::{bit_width, BitReader, BitWriter};
use crate::constants::{
    CHANNELS, CWF_PACKET_NUMBER_BITS, CWF_RANGE_BITS, CWF_RANGE_SCALE, CWF_SHOT_ID_BITS,
    CWF_VALIDITY_BITS, MAX_PACKETS, PACKET_SAMPLES, TIME_OFFSET_BITS,
};
use crate::error::{Error, Result};
use crate::scale;

use super::compress::{self, Packet, Scheme};

/// Why a channel's waveform is missing or degraded for a shot. Carried even
/// when the channel's packet list is empty, so a reader can tell "no return
/// was digitized" from "the digitizer saturated."
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Validity {
    /// The channel's waveform is usable.
    Valid,
    /// No return was digitized on this channel.
    NoReturn,
    /// The digitizer saturated.
    Saturated,
    /// Elevated noise floor, most likely from urban/vegetation clutter.
    NoisyBackground,
    /// The platform attitude put this channel's shot outside its valid
    /// off-nadir range.
    OffNadirOutOfRange,
    /// The shot's timestamp regressed and was nudged forward by the writer.
    TimeRegression,
}

impl Validity {
    fn code(self) -> u64 {
        match self {
            Validity::Valid => 0,
            Validity::NoReturn => 1,
            Validity::Saturated => 2,
            Validity::NoisyBackground => 3,
            Validity::OffNadirOutOfRange => 4,
            Validity::TimeRegression => 5,
        }
    }

    fn from_code(code: u64) -> Result<Validity> {
        match code {
            0 => Ok(Validity::Valid),
            1 => Ok(Validity::NoReturn),
            2 => Ok(Validity::Saturated),
            3 => Ok(Validity::NoisyBackground),
            4 => Ok(Validity::OffNadirOutOfRange),
            5 => Ok(Validity::TimeRegression),
            other => Err(Error::Inconsistent(format!("unknown waveform validity code {other}"))),
        }
    }
}

/// One channel's digitized packets for one shot.
#[derive(Clone, Debug)]
pub struct ChannelWaveform {
    /// The packets digitized for this channel, in packet-index order.
    pub packets: Vec<Packet>,
    /// Why the waveform is missing or degraded, if it is.
    pub validity: Validity,
}

/// One waveform-file record: nine channels of digitized packets, a trigger
/// waveform, and shot-level metadata.
#[derive(Clone, Debug)]
pub struct WaveformRecord {
    /// The shot's ordinal identifier.
    pub shot_id: u32,
    /// Microseconds since the file's start timestamp.
    pub time_offset_micros: u32,
    /// The scan (off-nadir) angle, in degrees.
    pub scan_angle_degrees: f64,
    /// Nine channels of digitized packets, shallow[0..7], infrared, deep.
    pub channels: [ChannelWaveform; CHANNELS],
    /// The 64-sample trigger (T0) waveform, always first-difference coded.
    pub trigger: [u16; PACKET_SAMPLES],
}

/// Encodes `record`'s body (everything after the leading record-size field)
/// into `buffer`, returning the number of bytes written.
pub fn encode_body(record: &WaveformRecord, buffer: &mut [u8]) -> Result<usize> {
    let mut writer = BitWriter::new(buffer);
    for (index, channel) in record.channels.iter().enumerate() {
        if channel.packets.len() > MAX_PACKETS {
            return Err(Error::TooManyPackets(channel.packets.len()));
        }
        writer.write_bits(channel.packets.len() as u64, bit_width(MAX_PACKETS as u64))?;
        for packet in &channel.packets {
            writer.write_bits(packet.index as u64, CWF_PACKET_NUMBER_BITS)?;
        }
        for packet in &channel.packets {
            let code = scale::encode(packet.range, CWF_RANGE_SCALE, 0.0, CWF_RANGE_BITS)?;
            writer.write_bits(code, CWF_RANGE_BITS)?;
        }
        let is_shallow_not_central = index != crate::constants::CENTRAL_SHALLOW_CHANNEL && channel_is_shallow(index);
        let reference_channel = if is_shallow_not_central {
            Some(&record.channels[crate::constants::CENTRAL_SHALLOW_CHANNEL])
        } else {
            None
        };
        let reference_packets = reference_channel.map(|rc| rc.packets.as_slice());
        let scheme = compress::choose_channel_scheme(&channel.packets, reference_packets);
        compress::write_scheme_tag(&mut writer, scheme)?;
        for packet in &channel.packets {
            let reference = reference_channel.and_then(|rc| rc.packets.iter().find(|r| r.index == packet.index));
            let scheme = if scheme == Scheme::CrossChannel && reference.is_none() {
                Scheme::FirstDifference
            } else {
                scheme
            };
            compress::encode_packet(&mut writer, packet, scheme, reference)?;
        }
    }

    let trigger_packet = Packet {
        index: 0,
        range: 0.0,
        samples: record.trigger,
    };
    compress::encode_packet(&mut writer, &trigger_packet, Scheme::FirstDifference, None)?;

    writer.write_bits(record.shot_id as u64, CWF_SHOT_ID_BITS)?;
    writer.write_bits(record.time_offset_micros as u64, TIME_OFFSET_BITS)?;
    let angle_code = scale::encode(
        record.scan_angle_degrees,
        crate::constants::ANGLE_SCALE,
        (1u64 << crate::constants::OFF_NADIR_BITS) as f64 / 2.0,
        crate::constants::OFF_NADIR_BITS,
    )?;
    writer.write_bits(angle_code, crate::constants::OFF_NADIR_BITS)?;
    for channel in &record.channels {
        writer.write_bits(channel.validity.code(), CWF_VALIDITY_BITS)?;
    }

    Ok(writer.byte_len())
}

fn channel_is_shallow(index: usize) -> bool {
    index < crate::constants::INFRARED_CHANNEL
}

/// Decodes a waveform record's body from `buffer`.
pub fn decode_body(buffer: &[u8]) -> Result<WaveformRecord> {
    let mut reader = BitReader::new(buffer);
    let mut channels: Vec<ChannelWaveform> = Vec::with_capacity(CHANNELS);
    let mut all_packets: Vec<Vec<Packet>> = Vec::with_capacity(CHANNELS);

    for index in 0..CHANNELS {
        let count = reader.read_bits(bit_width(MAX_PACKETS as u64))? as usize;
        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            indices.push(reader.read_bits(CWF_PACKET_NUMBER_BITS)? as u8);
        }
        let mut ranges = Vec::with_capacity(count);
        for _ in 0..count {
            let code = reader.read_bits(CWF_RANGE_BITS)?;
            ranges.push(scale::decode(code, CWF_RANGE_SCALE, 0.0));
        }
        let scheme = compress::read_scheme_tag(&mut reader)?;
        let reference_channel = if index != crate::constants::CENTRAL_SHALLOW_CHANNEL && channel_is_shallow(index) {
            Some(&all_packets[crate::constants::CENTRAL_SHALLOW_CHANNEL])
        } else {
            None
        };
        let mut packets = Vec::with_capacity(count);
        for i in 0..count {
            let reference = reference_channel.and_then(|rc| rc.iter().find(|p: &&Packet| p.index == indices[i]));
            let reference_samples = reference.map(|p| p.samples);
            let effective_scheme = if scheme == Scheme::CrossChannel && reference_samples.is_none() {
                Scheme::FirstDifference
            } else {
                scheme
            };
            let samples = compress::decode_packet(&mut reader, effective_scheme, reference_samples.as_ref())?;
            packets.push(Packet {
                index: indices[i],
                range: ranges[i],
                samples,
            });
        }
        all_packets.push(packets.clone());
        channels.push(ChannelWaveform {
            packets,
            validity: Validity::Valid,
        });
    }

    let trigger_packet = compress::decode_packet(&mut reader, Scheme::FirstDifference, None)?;

    let shot_id = reader.read_bits(CWF_SHOT_ID_BITS)? as u32;
    let time_offset_micros = reader.read_bits(TIME_OFFSET_BITS)? as u32;
    let angle_code = reader.read_bits(crate::constants::OFF_NADIR_BITS)?;
    let scan_angle_degrees = scale::decode(
        angle_code,
        crate::constants::ANGLE_SCALE,
        (1u64 << crate::constants::OFF_NADIR_BITS) as f64 / 2.0,
    );
    for channel in channels.iter_mut() {
        let code = reader.read_bits(CWF_VALIDITY_BITS)?;
        channel.validity = Validity::from_code(code)?;
    }

    let channels: [ChannelWaveform; CHANNELS] = channels
        .try_into()
        .map_err(|_| Error::Inconsistent("expected exactly nine channels".to_string()))?;

    Ok(WaveformRecord {
        shot_id,
        time_offset_micros,
        scan_angle_degrees,
        channels,
        trigger: trigger_packet,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_packet(index: u8, value: u16) -> Packet {
        Packet {
            index,
            range: 120.0,
            samples: [value; PACKET_SAMPLES],
        }
    }

    fn sample_record() -> WaveformRecord {
        let channels = std::array::from_fn(|i| ChannelWaveform {
            packets: vec![flat_packet(0, 200 + i as u16)],
            validity: Validity::Valid,
        });
        WaveformRecord {
            shot_id: 42,
            time_offset_micros: 123_456,
            scan_angle_degrees: 5.5,
            channels,
            trigger: [300; PACKET_SAMPLES],
        }
    }

    #[test]
    fn round_trips_a_record() {
        let record = sample_record();
        let mut buffer = vec![0u8; 16 * 1024];
        let len = encode_body(&record, &mut buffer).unwrap();
        let decoded = decode_body(&buffer[..len]).unwrap();
        assert_eq!(decoded.shot_id, record.shot_id);
        assert_eq!(decoded.time_offset_micros, record.time_offset_micros);
        assert!((decoded.scan_angle_degrees - record.scan_angle_degrees).abs() < 1e-3);
        assert_eq!(decoded.trigger, record.trigger);
        for (a, b) in decoded.channels.iter().zip(record.channels.iter()) {
            assert_eq!(a.packets.len(), b.packets.len());
            for (pa, pb) in a.packets.iter().zip(b.packets.iter()) {
                assert_eq!(pa.samples, pb.samples);
            }
        }
    }

    #[test]
    fn channel_with_mixed_slope_packets_round_trips() {
        // Channel 1's second packet has its own large first-sample jump that
        // the first packet does not; the channel's scheme must be chosen
        // accounting for every packet, or this panics partway through
        // encoding instead of round-tripping.
        let mut record = sample_record();
        let mut smooth = [0u16; PACKET_SAMPLES];
        for (i, sample) in smooth.iter_mut().enumerate() {
            *sample = (500.0 + 50.0 * (i as f64 * 0.2).sin()) as u16;
        }
        let mut jump = [900u16; PACKET_SAMPLES];
        jump[0] = 0;
        record.channels[1].packets = vec![
            Packet { index: 0, range: 120.0, samples: smooth },
            Packet { index: 1, range: 121.0, samples: jump },
        ];

        let mut buffer = vec![0u8; 16 * 1024];
        let len = encode_body(&record, &mut buffer).expect("a valid multi-packet channel must encode");
        let decoded = decode_body(&buffer[..len]).unwrap();
        assert_eq!(decoded.channels[1].packets.len(), 2);
        assert_eq!(decoded.channels[1].packets[0].samples, smooth);
        assert_eq!(decoded.channels[1].packets[1].samples, jump);
    }

    #[test]
    fn rejects_too_many_packets() {
        let mut record = sample_record();
        record.channels[0].packets = (0..MAX_PACKETS + 1).map(|i| flat_packet(i as u8, 1)).collect();
        let mut buffer = vec![0u8; 16 * 1024];
        assert!(encode_body(&record, &mut buffer).is_err());
    }
}
