use fourheat::encoder::{CommandEncoder, EncoderA, EncoderB};
use fourheat::frame::{self, FrameKind, Payload};
use fourheat::loader::Loader;
use fourheat::{DeviceSnapshot, Error, LoaderConfig};

#[test]
fn th_all_set_point_round_trips_through_encoder_a() {
    for set_point in [0u8, 5, 0x15, 0x2D, 0x63, 0xFF] {
        for room in ["00D2", "FFF6", "0000"] {
            let raw = format!("0100010F2D{set_point:02x}{room}01");
            let decoded = frame::decode(&raw).unwrap();
            let Some(Payload::ThAll(th)) = &decoded.payload else {
                panic!("{raw} should decode as ThAll");
            };
            assert_eq!(th.set_point, set_point);

            let encoded = EncoderA.encode(&raw, i32::from(th.set_point)).unwrap();
            assert_eq!(encoded, format!("05{raw}"));

            // Any other temperature only touches bytes 10..12 of the frame.
            let other = EncoderA.encode(&raw, 0x42).unwrap();
            assert_eq!(&other[2..12], &raw[..10]);
            assert_eq!(&other[12..14], "42");
            assert_eq!(&other[14..], &raw[12..]);
        }
    }
}

#[test]
fn signed_fields_never_fail() {
    for x in 0..=u16::MAX {
        let raw = format!("0E002A{x:04X}");
        let decoded = frame::decode(&raw).unwrap();
        let Some(Payload::ParValue(par)) = decoded.payload else {
            panic!("{raw} should decode as ParValue");
        };
        let expected = if x <= 32767 {
            i32::from(x)
        } else {
            i32::from(x) - 65536
        };
        assert_eq!(par.value, expected);
    }
}

#[test]
fn negative_par_value_wraps_per_encoder() {
    assert_eq!(EncoderA.encode("0E002A0014", -1).unwrap(), "050E002Afffe");
    assert_eq!(EncoderB.encode("0E002A0014", -1).unwrap(), "050E002Affff");
}

#[test]
fn unknown_kinds_keep_their_tag() {
    let decoded = frame::decode("7F0102").unwrap();
    assert_eq!(decoded.kind, FrameKind::Unknown(0x7F));
    assert!(decoded.payload.is_none());
}

#[test]
fn batch_without_main_values_never_mutates_snapshot() {
    let batches: [&[&str]; 3] = [
        &["2WL", "0"],
        &["2WL", "0", "0C8100150028009600030002001600AB12CD"],
        &["0E002A0013", "0100010F2D1400D201"],
    ];
    for batch in batches {
        let batch: Vec<String> = batch.iter().map(|s| s.to_string()).collect();
        let mut loader = Loader::new(LoaderConfig::default(), DeviceSnapshot::default());
        let before = loader.snapshot().clone();
        let err = loader.load_from_local(&batch).unwrap_err();
        assert!(matches!(err, Error::DeviceDataLoad { .. }), "got {err:?}");
        assert_eq!(loader.snapshot(), &before);
    }
}
