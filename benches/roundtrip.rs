//! Benchmarks for waveform and point record encoding at varying record sizes.

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use czmil::constants::{CHANNELS, INFRARED_CHANNEL, PACKET_SAMPLES};
use czmil::point::{encode_body as encode_point_body, BareEarth, PointRecord, Return};
use czmil::waveform::record::{encode_body as encode_waveform_body, ChannelWaveform, Validity, WaveformRecord};
use czmil::waveform::Packet;

fn waveform_record(packets_per_channel: usize) -> WaveformRecord {
    let channels = std::array::from_fn(|i| ChannelWaveform {
        packets: (0..packets_per_channel)
            .map(|p| Packet {
                index: p as u8,
                range: 120.0 + p as f64,
                samples: std::array::from_fn(|s| (200 + i + s) as u16),
            })
            .collect(),
        validity: Validity::Valid,
    });
    WaveformRecord {
        shot_id: 1,
        time_offset_micros: 100,
        scan_angle_degrees: 3.5,
        channels,
        trigger: [300u16; PACKET_SAMPLES],
    }
}

fn point_record(returns_per_channel: usize) -> PointRecord {
    let sample_return = || Return {
        latitude_diff_degrees: 0.0001,
        longitude_diff_degrees: -0.0002,
        elevation_meters: Some(-3.2),
        reflectance: 0.4,
        horizontal_uncertainty_meters: 0.1,
        vertical_uncertainty_meters: 0.15,
        status: 1,
        classification: 9,
        interest_point: 0.6,
        is_non_water_surface: false,
        probability: 0.7,
        filter_reason: 0,
        detection_index: 1,
    };
    let returns: [Vec<Return>; CHANNELS] = std::array::from_fn(|_| (0..returns_per_channel).map(|_| sample_return()).collect());
    PointRecord {
        time_offset_micros: 10,
        off_nadir_angle_degrees: 1.0,
        reference_latitude_degrees: 34.5,
        reference_longitude_degrees: -120.1,
        water_level_elevation_meters: 0.2,
        local_vertical_datum_offset_meters: 0.0,
        user_data: 0,
        returns,
        bare_earth: [Some(BareEarth {
            latitude_diff_degrees: 0.0,
            longitude_diff_degrees: 0.0,
            elevation_meters: 1.0,
        }); INFRARED_CHANNEL],
        kd: 0.1,
        laser_energy: 1.0,
        trigger_interest_point: 0.99,
        processing_mode: [0; CHANNELS],
        cube_detection_index: 0,
    }
}

fn benchmark_waveform_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("waveform_encode");
    let mut buffer = vec![0u8; 64 * 1024];
    for packets in [1usize, 5, 15] {
        let record = waveform_record(packets);
        group.bench_function(format!("packets_{packets}"), |b| {
            b.iter(|| {
                let len = encode_waveform_body(black_box(&record), &mut buffer).unwrap();
                black_box(len);
            });
        });
    }
    group.finish();
}

fn benchmark_point_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_encode");
    let mut buffer = vec![0u8; 64 * 1024];
    for returns in [0usize, 1, 10, 31] {
        let record = point_record(returns);
        group.bench_function(format!("returns_{returns}"), |b| {
            b.iter(|| {
                let len = encode_point_body(black_box(&record), &mut buffer).unwrap();
                black_box(len);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_waveform_encode, benchmark_point_encode);
criterion_main!(benches);
