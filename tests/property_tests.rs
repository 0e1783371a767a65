//! Property-based tests for sluice
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Line Codec Properties
// ============================================================================

mod codec_properties {
    use super::*;
    use sluice_core::LineDecoder;
    use sluice_core::codec::encode;

    fn frames() -> impl Strategy<Value = Vec<(String, String)>> {
        prop::collection::vec(("[A-Z_]{1,12}", "[a-zA-Z0-9 ;.()=+/:]{0,40}"), 0..20)
    }

    proptest! {
        /// Decoding does not depend on how the stream is split into reads
        #[test]
        fn chunk_boundaries_do_not_matter(
            frames in frames(),
            cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
        ) {
            let stream: Vec<u8> = frames
                .iter()
                .flat_map(|(name, payload)| encode(name, payload))
                .collect();

            let whole = LineDecoder::new().decode(&stream);

            let mut offsets: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
            offsets.sort_unstable();
            let mut decoder = LineDecoder::new();
            let mut pieces = Vec::new();
            let mut start = 0;
            for end in offsets.into_iter().chain(std::iter::once(stream.len())) {
                pieces.extend(decoder.decode(&stream[start..end]));
                start = end;
            }

            prop_assert_eq!(&pieces, &whole);
            prop_assert!(decoder.pending().is_empty());
        }

        /// Every encoded frame comes back with its name and trimmed payload
        #[test]
        fn frames_survive_encoding(frames in frames()) {
            let stream: Vec<u8> = frames
                .iter()
                .flat_map(|(name, payload)| encode(name, payload))
                .collect();

            let decoded = LineDecoder::new().decode(&stream);
            prop_assert_eq!(decoded.len(), frames.len());
            for (command, (name, payload)) in decoded.iter().zip(&frames) {
                prop_assert_eq!(&command.name, name);
                prop_assert_eq!(command.payload.as_str(), payload.trim());
            }
        }

        /// Line breaks inside a payload never split a frame
        #[test]
        fn encoded_frame_has_one_terminator(payload in "[a-z\r\n]{0,32}") {
            let frame = encode("ERROR", &payload);
            prop_assert_eq!(frame.iter().filter(|&&b| b == b'\n').count(), 1);
            prop_assert_eq!(frame.last(), Some(&b'\n'));
            prop_assert!(!frame.contains(&b'\r'));
        }
    }
}

// ============================================================================
// Congestion Control Properties
// ============================================================================

mod congestion_properties {
    use super::*;
    use sluice_core::{Algorithm, CongestionConfig, CongestionController};
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, Copy)]
    enum Event {
        Sent,
        Ack,
        Loss,
    }

    fn algorithm() -> impl Strategy<Value = Algorithm> {
        prop::sample::select(Algorithm::ALL.to_vec())
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![Just(Event::Sent), Just(Event::Ack), Just(Event::Loss)]
    }

    fn controller(algorithm: Algorithm, cap: u32) -> CongestionController {
        let config = CongestionConfig {
            algorithm,
            receive_window_cap: cap,
            ..CongestionConfig::default()
        };
        CongestionController::new(&config, Instant::now())
    }

    proptest! {
        /// The window stays within [0, receive window cap] whatever happens
        #[test]
        fn window_stays_bounded(
            algorithm in algorithm(),
            cap in 1u32..200,
            events in prop::collection::vec(event(), 0..300),
        ) {
            let now = Instant::now();
            let mut cc = controller(algorithm, cap);
            for event in events {
                match event {
                    Event::Sent => cc.on_data_sent(1024, now),
                    Event::Ack => cc.on_ack_received(now, Duration::from_millis(5)),
                    Event::Loss => cc.on_packet_loss(now),
                }
                prop_assert!(cc.congestion_window() >= 0.0);
                prop_assert!(cc.congestion_window() <= f64::from(cap));
                prop_assert!(cc.slow_start_threshold() >= 1.0);
                prop_assert!(cc.effective_window() >= 1.0);
            }
        }

        /// Without loss the window never shrinks on acknowledgement
        #[test]
        fn acks_never_shrink_window(algorithm in algorithm(), acks in 1usize..200) {
            let now = Instant::now();
            let mut cc = controller(algorithm, 65535);
            let mut previous = cc.congestion_window();
            for _ in 0..acks {
                cc.on_ack_received(now, Duration::from_millis(10));
                prop_assert!(cc.congestion_window() >= previous);
                previous = cc.congestion_window();
            }
        }

        /// Tahoe restarts slow start from one packet
        #[test]
        fn tahoe_loss_resets_window(acks in 0usize..100) {
            let now = Instant::now();
            let mut cc = controller(Algorithm::Tahoe, 65535);
            for _ in 0..acks {
                cc.on_ack_received(now, Duration::from_millis(10));
            }
            let before = cc.congestion_window();
            cc.on_packet_loss(now);

            prop_assert_eq!(cc.congestion_window(), 1.0);
            prop_assert!(cc.in_slow_start());
            prop_assert!((cc.slow_start_threshold() - (before / 2.0).max(1.0)).abs() < 1e-9);
        }

        /// Reno halves into congestion avoidance
        #[test]
        fn reno_loss_halves_window(acks in 0usize..100) {
            let now = Instant::now();
            let mut cc = controller(Algorithm::Reno, 65535);
            for _ in 0..acks {
                cc.on_ack_received(now, Duration::from_millis(10));
            }
            let before = cc.congestion_window();
            cc.on_packet_loss(now);

            let expected = (before / 2.0).max(1.0);
            prop_assert!((cc.congestion_window() - expected).abs() < 1e-9);
            prop_assert!((cc.slow_start_threshold() - expected).abs() < 1e-9);
            prop_assert!(!cc.in_slow_start());
        }

        /// The loss rate is the ratio of losses to packets sent
        #[test]
        fn loss_rate_matches_counts(sent in 1u64..100, lost in 0u64..100) {
            let now = Instant::now();
            let mut cc = controller(Algorithm::Cubic, 65535);
            for _ in 0..sent {
                cc.on_data_sent(512, now);
            }
            for _ in 0..lost {
                cc.on_packet_loss(now);
            }
            let snapshot = cc.snapshot();
            prop_assert_eq!(snapshot.packets_total, sent);
            prop_assert_eq!(snapshot.packets_lost, lost);
            prop_assert!((snapshot.packet_loss_rate - lost as f64 / sent as f64).abs() < 1e-9);
        }
    }
}

// ============================================================================
// Storage Properties
// ============================================================================

mod storage_properties {
    use super::*;
    use sluice_core::transfer::sanitize_filename;

    proptest! {
        /// Accepted names are a single plain path component
        #[test]
        fn sanitized_names_stay_in_directory(name in "[a-z./\\\\]{0,16}") {
            if let Ok(clean) = sanitize_filename(&name) {
                prop_assert!(!clean.is_empty());
                prop_assert!(!clean.contains('/'));
                prop_assert_ne!(clean, "..");
                prop_assert_ne!(clean, ".");
            }
        }
    }
}
