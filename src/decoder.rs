//! EDA frame decoding
//!
//! The EDA sensor streams ASCII CSV lines terminated by `\n` over a
//! serial-like channel. Chunk boundaries are arbitrary, so the decoder keeps
//! partial lines in its own scratch buffer between calls.
//!
//! Line layout (legacy Q sensor format):
//!
//! ```text
//! time,z,y,x,battery,temp,eda,event\r\n
//!                         ^ field 6
//! ```

use crate::config::{
    PipelineConfig, DEFAULT_EDA_FIELD_INDEX, DEFAULT_MAX_FRAME_BYTES, DEFAULT_MIN_FIELDS,
};
use crate::error::DecodeError;
use crate::types::EdaFrame;
use chrono::Utc;
use log::{debug, warn};

/// Line delimiter (ASCII newline)
pub const FRAME_DELIMITER: u8 = b'\n';

type Clock = Box<dyn FnMut() -> i64 + Send>;

fn wall_clock_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Streaming decoder for the EDA CSV channel
pub struct FrameDecoder {
    scratch: Vec<u8>,
    /// Set after FrameTooLarge; bytes are skipped until the next delimiter
    discarding: bool,
    max_frame_bytes: usize,
    field_index: usize,
    min_fields: usize,
    clock: Clock,
    frames_decoded: u64,
    failures: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl FrameDecoder {
    /// Create a decoder for the legacy layout with the given scratch cap
    pub fn new(max_frame_bytes: usize) -> Self {
        Self::with_layout(max_frame_bytes, DEFAULT_EDA_FIELD_INDEX, DEFAULT_MIN_FIELDS)
    }

    /// Create a decoder with an explicit field layout
    pub fn with_layout(max_frame_bytes: usize, field_index: usize, min_fields: usize) -> Self {
        Self {
            scratch: Vec::with_capacity(64),
            discarding: false,
            max_frame_bytes,
            field_index,
            min_fields,
            clock: Box::new(wall_clock_ms),
            frames_decoded: 0,
            failures: 0,
        }
    }

    /// Create a decoder from pipeline configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::with_layout(
            config.max_frame_bytes,
            config.eda_field_index,
            config.min_fields,
        )
    }

    /// Replace the timestamp source (milliseconds)
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: FnMut() -> i64 + Send + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// Feed newly available bytes and return one result per completed line.
    ///
    /// Partial lines are retained for the next call. Failures are logged and
    /// reported in the output; they never stop decoding.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<EdaFrame, DecodeError>> {
        let mut out = Vec::new();

        for &byte in bytes {
            if self.discarding {
                if byte == FRAME_DELIMITER {
                    debug!("Resynchronized on delimiter after oversized frame");
                    self.discarding = false;
                }
                continue;
            }

            if byte == FRAME_DELIMITER {
                let result = self.decode_line();
                self.scratch.clear();
                match &result {
                    Ok(_) => self.frames_decoded += 1,
                    Err(e) => {
                        self.failures += 1;
                        warn!("Dropping EDA frame: {}", e);
                    }
                }
                out.push(result);
                continue;
            }

            if self.scratch.len() >= self.max_frame_bytes {
                self.scratch.clear();
                self.discarding = true;
                self.failures += 1;
                let err = DecodeError::FrameTooLarge {
                    limit: self.max_frame_bytes,
                };
                warn!("Resetting EDA decoder: {}", err);
                out.push(Err(err));
                continue;
            }

            self.scratch.push(byte);
        }

        out
    }

    /// Feed bytes and keep only the successfully decoded frames
    pub fn feed_frames(&mut self, bytes: &[u8]) -> Vec<EdaFrame> {
        self.feed(bytes).into_iter().filter_map(Result::ok).collect()
    }

    /// Number of buffered bytes awaiting a delimiter
    pub fn pending_len(&self) -> usize {
        self.scratch.len()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Lines dropped as malformed or oversized
    pub fn failures(&self) -> u64 {
        self.failures
    }

    fn decode_line(&mut self) -> Result<EdaFrame, DecodeError> {
        if !self.scratch.is_ascii() {
            return Err(DecodeError::NonAscii);
        }
        let line: String = self
            .scratch
            .iter()
            .filter(|&&b| b != b'\r' && b != b'\n')
            .map(|&b| b as char)
            .collect();

        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < self.min_fields {
            return Err(DecodeError::FieldCount {
                expected: self.min_fields,
                found: fields.len(),
            });
        }

        let text = fields
            .get(self.field_index)
            .ok_or(DecodeError::FieldCount {
                expected: self.field_index + 1,
                found: fields.len(),
            })?
            .trim();
        // `nan`, `inf` and out-of-range literals parse; only finite values count
        let raw_value = text
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| DecodeError::InvalidValue(text.to_string()))?;

        Ok(EdaFrame {
            timestamp_ms: (self.clock)(),
            raw_value,
            raw_text: text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const LINE: &[u8] = b"1393260043,-0.05,0.94,0.12,3.91,31.2,1.234,0\r\n";

    fn fixed_decoder() -> FrameDecoder {
        FrameDecoder::default().with_clock(|| 1000)
    }

    #[test]
    fn test_decode_single_line() {
        let mut decoder = fixed_decoder();
        let frames = decoder.feed_frames(LINE);

        assert_eq!(
            frames,
            vec![EdaFrame {
                timestamp_ms: 1000,
                raw_value: 1.234,
                raw_text: "1.234".to_string(),
            }]
        );
        assert_eq!(decoder.pending_len(), 0);
        assert_eq!(decoder.frames_decoded(), 1);
    }

    #[test]
    fn test_partial_line_is_retained() {
        let mut decoder = fixed_decoder();
        assert!(decoder.feed(&LINE[..10]).is_empty());
        assert_eq!(decoder.pending_len(), 10);

        let frames = decoder.feed_frames(&LINE[10..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].raw_value, 1.234);
    }

    #[test]
    fn test_empty_chunk() {
        let mut decoder = fixed_decoder();
        assert!(decoder.feed(&[]).is_empty());
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut decoder = fixed_decoder();
        let mut chunk = Vec::new();
        chunk.extend_from_slice(b"0,0,0,0,0,0,1.0,0\n");
        chunk.extend_from_slice(b"1,0,0,0,0,0,2.5,0\n");
        chunk.extend_from_slice(b"2,0,0,0,0,0,3.");

        let values: Vec<f32> = decoder
            .feed_frames(&chunk)
            .iter()
            .map(|f| f.raw_value)
            .collect();
        assert_eq!(values, vec![1.0, 2.5]);
        assert_eq!(decoder.pending_len(), 14);
    }

    #[test]
    fn test_short_line_is_decode_failure() {
        let mut decoder = fixed_decoder();
        let results = decoder.feed(b"1,2,3\n");

        assert_eq!(
            results,
            vec![Err(DecodeError::FieldCount {
                expected: 7,
                found: 3
            })]
        );
        assert_eq!(decoder.failures(), 1);

        // Decoder keeps working after a failure
        assert_eq!(decoder.feed_frames(LINE).len(), 1);
    }

    #[test]
    fn test_bad_float_is_decode_failure() {
        let mut decoder = fixed_decoder();
        let results = decoder.feed(b"0,0,0,0,0,0,abc,0\n");
        assert_eq!(
            results,
            vec![Err(DecodeError::InvalidValue("abc".to_string()))]
        );
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_non_finite_values_are_decode_failures() {
        let mut decoder = fixed_decoder();
        for token in ["nan", "NaN", "inf", "-infinity", "1e39"] {
            let line = format!("0,0,0,0,0,0,{},0\n", token);
            let results = decoder.feed(line.as_bytes());
            assert_eq!(
                results,
                vec![Err(DecodeError::InvalidValue(token.to_string()))],
                "token {}",
                token
            );
        }
        assert_eq!(decoder.failures(), 5);
        assert_eq!(decoder.frames_decoded(), 0);
    }

    #[test]
    fn test_exactly_seven_fields() {
        let mut decoder = fixed_decoder();
        let frames = decoder.feed_frames(b"0,0,0,0,0,0,0.75\n");
        assert_eq!(frames[0].raw_value, 0.75);
    }

    #[test]
    fn test_non_ascii_rejected() {
        let mut decoder = fixed_decoder();
        let results = decoder.feed(b"0,0,0,0,0,0,\xff1.0,0\n");
        assert_eq!(results, vec![Err(DecodeError::NonAscii)]);
    }

    #[test]
    fn test_frame_too_large_resets_and_resyncs() {
        let mut decoder = FrameDecoder::new(16).with_clock(|| 0);
        let results = decoder.feed(b"0,0,0,0,0,0,1.0,0,0,0,0,0,0,0,0,0,0,9.9,9.9\n");

        assert_eq!(results, vec![Err(DecodeError::FrameTooLarge { limit: 16 })]);
        assert_eq!(decoder.pending_len(), 0);

        // The tail of the oversized line must not surface as a frame
        let frames = decoder.feed_frames(b"0,0,0,0,0,0,2.0\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].raw_value, 2.0);
    }

    #[test]
    fn test_unterminated_stream_is_bounded() {
        let mut decoder = FrameDecoder::new(32);
        for _ in 0..100 {
            decoder.feed(&[b'7'; 10]);
            assert!(decoder.pending_len() <= 32);
        }
    }

    #[test]
    fn test_layout_with_index_past_min_fields_does_not_panic() {
        let mut decoder = FrameDecoder::with_layout(128, 6, 2).with_clock(|| 0);
        let results = decoder.feed(b"1,2,3\n");
        assert_eq!(
            results,
            vec![Err(DecodeError::FieldCount {
                expected: 7,
                found: 3
            })]
        );

        let frames = decoder.feed_frames(b"0,0,0,0,0,0,1.25\n");
        assert_eq!(frames[0].raw_value, 1.25);
    }

    #[test]
    fn test_custom_layout() {
        let mut decoder = FrameDecoder::with_layout(128, 1, 2).with_clock(|| 5);
        let frames = decoder.feed_frames(b"12,3.5\n");
        assert_eq!(frames[0].raw_value, 3.5);
    }

    proptest! {
        #[test]
        fn prop_well_formed_line_yields_field_six(value in 0.0f32..50.0, ts in 0u64..u64::MAX) {
            let line = format!("{},0.1,0.2,0.3,3.9,31.0,{},0\r\n", ts, value);
            let mut decoder = FrameDecoder::default().with_clock(|| 0);
            let frames = decoder.feed_frames(line.as_bytes());
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(frames[0].raw_value, value);
        }

        #[test]
        fn prop_chunking_does_not_change_output(split in 0usize..=LINE.len() * 2) {
            let mut stream = LINE.to_vec();
            stream.extend_from_slice(b"5,0,0,0,0,0,0.5,1\n");

            let mut whole = FrameDecoder::default().with_clock(|| 0);
            let expected = whole.feed(&stream);

            let split = split.min(stream.len());
            let mut chunked = FrameDecoder::default().with_clock(|| 0);
            let mut actual = chunked.feed(&stream[..split]);
            actual.extend(chunked.feed(&stream[split..]));

            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn prop_byte_at_a_time_matches_whole(value in 0.0f32..20.0) {
            let line = format!("1,2,3,4,5,6,{},8\n", value);
            let mut whole = FrameDecoder::default().with_clock(|| 0);
            let expected = whole.feed(line.as_bytes());

            let mut bytewise = FrameDecoder::default().with_clock(|| 0);
            let mut actual = Vec::new();
            for b in line.as_bytes() {
                actual.extend(bytewise.feed(std::slice::from_ref(b)));
            }
            prop_assert_eq!(actual, expected);
        }
    }
}
