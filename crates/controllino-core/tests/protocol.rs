use controllino_core::protocol::{
    encode, encode_frame, try_decode, Checksum, Command, DecodeOptions, Decoded, FrameBuffer,
    MalformedReason, PinMode, Response, Status, START_BYTE,
};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decode the first frame from input that has ended.
/// Returns the payload and the number of bytes discarded.
fn decode_with_resync(bytes: &[u8], options: DecodeOptions) -> Option<(Vec<u8>, usize)> {
    let mut buffer = FrameBuffer::new(options);
    buffer.extend(bytes);
    let payload = buffer.flush_frame()?;
    Some((payload, buffer.discarded()))
}

/// `len` noise bytes followed by `frame`.
///
/// Start bytes are common in the noise, and every other buffer has one
/// directly before the frame. Noise that happens to contain a valid frame
/// is regenerated.
fn noisy(rng: &mut StdRng, len: usize, frame: &[u8]) -> Vec<u8> {
    let options = DecodeOptions::default();
    loop {
        let mut buffer: Vec<u8> = (0..len)
            .map(|_| if rng.gen_bool(0.25) { START_BYTE } else { rng.gen() })
            .collect();
        if len > 0 && rng.gen_bool(0.5) {
            buffer[len - 1] = START_BYTE;
        }
        buffer.extend_from_slice(frame);

        let spurious = (0..len)
            .any(|i| matches!(try_decode(&buffer[i..], &options), Decoded::Frame { .. }));
        if !spurious {
            return buffer;
        }
    }
}

#[test]
fn test_roundtrip_random_payloads() {
    let mut rng = StdRng::seed_from_u64(7);
    for checksum in [Checksum::Sum8, Checksum::Crc8] {
        let options = DecodeOptions {
            checksum,
            ..DecodeOptions::default()
        };
        for len in [0usize, 1, 2, 17, 254, 255] {
            let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let encoded = encode_frame(&payload, checksum).unwrap();
            assert_eq!(encoded.len(), len + 3);
            assert_eq!(
                try_decode(&encoded, &options),
                Decoded::Frame {
                    payload,
                    consumed: len + 3
                }
            );
        }
    }
}

#[test]
fn test_every_command_roundtrips_as_payload() {
    let commands = vec![
        Command::Ready,
        Command::GetInput { pin: 54 },
        Command::SetOutput { pin: 12, level: 4095 },
        Command::GetPinMode { pin: 30 },
        Command::SetPinMode { pin: 30, mode: PinMode::Output },
        Command::LoadPinModes,
        Command::SavePinModes,
        Command::ResetPinModes,
        Command::TriggerPulse { pin: 40 },
        Command::LogSignal { pin: 54, period_ms: 1000 },
        Command::EndLogSignal { pin: 54 },
        Command::Raw { opcode: 0x60, args: vec![1, 2, 3] },
    ];
    for command in commands {
        for sequence in [None, Some(0x2A)] {
            let encoded = encode(&command, sequence, Checksum::Sum8).unwrap();
            match try_decode(&encoded, &DecodeOptions::default()) {
                Decoded::Frame { payload, .. } => assert_eq!(payload, command.to_payload(sequence)),
                other => panic!("{} failed to decode: {:?}", command, other),
            }
        }
    }
}

#[test]
fn test_resync_discards_exactly_garbage() {
    let mut rng = StdRng::seed_from_u64(42);

    for payload in [vec![0x00, 0x7B, 0x00], vec![]] {
        let encoded = encode_frame(&payload, Checksum::Sum8).unwrap();
        let mut stray_start_cases = 0;

        for n in 0..40 {
            let buffer = noisy(&mut rng, n, &encoded);
            if n > 0 && buffer[n - 1] == START_BYTE {
                stray_start_cases += 1;
            }
            let (found, discarded) = decode_with_resync(&buffer, DecodeOptions::default())
                .expect("frame should be found");
            assert_eq!(found, payload, "noise {:02x?}", &buffer[..n]);
            assert_eq!(discarded, n, "noise {:02x?}", &buffer[..n]);
        }
        assert!(stray_start_cases > 0);
    }
}

#[test]
fn test_resync_past_false_start() {
    // A start byte followed by a bogus length-complete frame
    let mut bytes = vec![START_BYTE, 0x01, 0x55, 0x00];
    let encoded = encode_frame(&[0x10, 0x20], Checksum::Sum8).unwrap();
    bytes.extend_from_slice(&encoded);

    let mut buffer = FrameBuffer::new(DecodeOptions::default());
    buffer.extend(&bytes);
    assert_eq!(buffer.next_frame(), Some(vec![0x10, 0x20]));
    assert_eq!(buffer.discarded(), 4);
}

#[test]
fn test_stray_start_before_ack_is_recovered_on_flush() {
    let mut bytes = vec![START_BYTE];
    bytes.extend(encode_frame(&[], Checksum::Sum8).unwrap());

    let (found, discarded) = decode_with_resync(&bytes, DecodeOptions::default()).unwrap();
    assert_eq!(found, Vec::<u8>::new());
    assert_eq!(discarded, 1);
}

#[test]
fn test_checksum_sensitivity_every_byte_every_bit() {
    let payload = vec![0x00, 0x01, 0x02, 0xFE, 0xFF];
    for checksum in [Checksum::Sum8, Checksum::Crc8] {
        let options = DecodeOptions {
            checksum,
            ..DecodeOptions::default()
        };
        let encoded = encode_frame(&payload, checksum).unwrap();
        for index in 2..2 + payload.len() {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[index] ^= 1 << bit;
                assert!(
                    matches!(
                        try_decode(&corrupted, &options),
                        Decoded::Malformed(MalformedReason::ChecksumMismatch { .. })
                    ),
                    "{:?}: flip of bit {} in byte {} not detected",
                    checksum,
                    bit,
                    index
                );
            }
        }
    }
}

#[test]
fn test_zero_length_frame_is_ack() {
    let encoded = encode_frame(&[], Checksum::Sum8).unwrap();
    let Decoded::Frame { payload, consumed } = try_decode(&encoded, &DecodeOptions::default())
    else {
        panic!("empty frame should decode");
    };
    assert_eq!(consumed, 3);
    let response = Response::from_payload(&payload);
    assert_eq!(response.status, Status::Ok);
    assert!(response.result.is_empty());
}

#[test]
fn test_checksum_mismatch_across_algorithms() {
    let encoded = encode_frame(&[1, 2, 3], Checksum::Crc8).unwrap();
    assert!(matches!(
        try_decode(&encoded, &DecodeOptions::default()),
        Decoded::Malformed(MalformedReason::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_decode_error_display() {
    let reason = MalformedReason::ChecksumMismatch {
        expected: 0x10,
        actual: 0x11,
    };
    assert_eq!(reason.to_string(), "checksum mismatch: expected 0x10, got 0x11");
}
