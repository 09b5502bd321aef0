//! Time-driven frame sequences shared by character sprites and animated tiles.
//!
//! All timing is integer milliseconds. A sprite keeps a playback `position`
//! in `[0, total_duration)` and the index of the frame covering it; the index
//! only ever moves forward until the position wraps, so a tick costs O(1)
//! amortized for the small, non-negative deltas a game loop produces.

use std::io::Cursor;
use std::sync::Arc;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageError, RgbaImage};

/// Delay used for GIF frames authored with a zero delay.
pub const DEFAULT_GIF_FRAME_MS: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum AnimationError {
    #[error("animation has no frames")]
    Empty,

    #[error("failed to decode animation: {0}")]
    Decode(#[from] ImageError),
}

/// A single image shown for `duration` ms starting at `start_time`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: Arc<RgbaImage>,
    pub start_time: u64,
    pub duration: u64,
    pub end_time: u64,
}

#[derive(Debug, Clone)]
pub struct AnimatedSprite {
    frames: Vec<Frame>,
    total_duration: u64,
    position: u64,
    active_frame_index: usize,
}

impl AnimatedSprite {
    /// Build from `(image, duration_ms)` pairs played in order.
    pub fn from_frames(
        frames: impl IntoIterator<Item = (Arc<RgbaImage>, u64)>,
    ) -> Result<Self, AnimationError> {
        let mut start_time = 0u64;
        let frames: Vec<Frame> = frames
            .into_iter()
            .map(|(image, duration)| {
                let frame = Frame {
                    image,
                    start_time,
                    duration,
                    end_time: start_time + duration,
                };
                start_time += duration;
                frame
            })
            .collect();
        if frames.is_empty() {
            return Err(AnimationError::Empty);
        }
        Ok(Self {
            frames,
            total_duration: start_time,
            position: 0,
            active_frame_index: 0,
        })
    }

    /// Decode every frame of an animated GIF with its authored delay.
    pub fn from_gif(bytes: &[u8]) -> Result<Self, AnimationError> {
        let decoder = GifDecoder::new(Cursor::new(bytes))?;
        let frames = decoder.into_frames().collect_frames()?;
        log::debug!("Decoded {} GIF frames", frames.len());
        Self::from_frames(frames.into_iter().map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let delay = if denom == 0 {
                0
            } else {
                u64::from(numer) / u64::from(denom)
            };
            let delay = if delay == 0 {
                DEFAULT_GIF_FRAME_MS
            } else {
                delay
            };
            (Arc::new(frame.into_buffer()), delay)
        }))
    }

    /// Advance playback by `timedelta` ms. Returns `true` when the active frame changed.
    ///
    /// The position is reduced modulo the total duration before scanning, so a
    /// delta spanning several laps lands directly on the right frame.
    pub fn update(&mut self, timedelta: u64) -> bool {
        if self.total_duration == 0 {
            return false;
        }
        let previous_index = self.active_frame_index;
        let new_position = (self.position + timedelta % self.total_duration) % self.total_duration;
        if new_position < self.position {
            self.active_frame_index = 0;
        }
        self.position = new_position;
        while self.position >= self.frames[self.active_frame_index].end_time {
            self.active_frame_index += 1;
        }
        self.active_frame_index != previous_index
    }

    pub fn reset(&mut self) {
        self.position = 0;
        self.active_frame_index = 0;
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn total_duration(&self) -> u64 {
        self.total_duration
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn active_frame_index(&self) -> usize {
        self.active_frame_index
    }

    pub fn active_frame(&self) -> &Frame {
        &self.frames[self.active_frame_index]
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.active_frame().image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Rgba};

    fn solid(color: [u8; 4]) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(2, 2, Rgba(color)))
    }

    fn make_sprite(durations: &[u64]) -> AnimatedSprite {
        AnimatedSprite::from_frames(
            durations
                .iter()
                .enumerate()
                .map(|(i, &d)| (solid([i as u8, 0, 0, 255]), d)),
        )
        .expect("non-empty frames")
    }

    #[test]
    fn frames_get_cumulative_start_times() {
        let sprite = make_sprite(&[50, 200, 100]);
        let starts: Vec<u64> = sprite.frames().iter().map(|f| f.start_time).collect();
        let ends: Vec<u64> = sprite.frames().iter().map(|f| f.end_time).collect();
        assert_eq!(starts, vec![0, 50, 250]);
        assert_eq!(ends, vec![50, 250, 350]);
        assert_eq!(sprite.total_duration(), 350);
    }

    #[test]
    fn empty_frame_list_is_rejected() {
        assert!(matches!(
            AnimatedSprite::from_frames(Vec::new()),
            Err(AnimationError::Empty)
        ));
    }

    #[test]
    fn one_ms_advances_to_second_frame() {
        let mut sprite = make_sprite(&[1, 1]);
        assert_eq!(sprite.active_frame_index(), 0);
        assert!(sprite.update(1));
        assert_eq!(sprite.active_frame_index(), 1);
    }

    #[test]
    fn full_cycle_wraps_to_first_frame() {
        let mut sprite = make_sprite(&[1, 1]);
        sprite.update(1);
        sprite.update(1);
        assert_eq!(sprite.active_frame_index(), 0);
        assert_eq!(sprite.position(), 0);
    }

    #[test]
    fn multi_lap_jump_lands_on_correct_frame() {
        let mut sprite = make_sprite(&[100, 100, 100]);
        sprite.update(50);
        // 50 + 1000 = 1050, 1050 mod 300 = 150 -> frame 1
        sprite.update(1000);
        assert_eq!(sprite.position(), 150);
        assert_eq!(sprite.active_frame_index(), 1);

        // 150 + 3 * 300 + 100 = 250 after reduction -> frame 2
        sprite.update(3 * 300 + 100);
        assert_eq!(sprite.active_frame_index(), 2);
    }

    #[test]
    fn matches_modulo_reference_over_many_ticks() {
        let durations = [30, 70, 10, 90];
        let mut sprite = make_sprite(&durations);
        let total: u64 = durations.iter().sum();
        let mut elapsed = 0u64;
        for step in [0u64, 7, 13, 16, 16, 250, 17, 1, 999, 33, 400, 16] {
            sprite.update(step);
            elapsed += step;
            let position = elapsed % total;
            let expected = sprite
                .frames()
                .iter()
                .position(|f| position >= f.start_time && position < f.end_time)
                .expect("position covered by a frame");
            assert_eq!(
                sprite.active_frame_index(),
                expected,
                "after elapsed={elapsed}"
            );
        }
    }

    #[test]
    fn zero_delta_keeps_frame() {
        let mut sprite = make_sprite(&[10, 10]);
        assert!(!sprite.update(0));
        assert_eq!(sprite.active_frame_index(), 0);
    }

    #[test]
    fn reset_returns_to_start() {
        let mut sprite = make_sprite(&[10, 10]);
        sprite.update(15);
        sprite.reset();
        assert_eq!(sprite.position(), 0);
        assert_eq!(sprite.active_frame_index(), 0);
    }

    #[test]
    fn from_gif_reads_frames_and_delays() {
        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new(&mut bytes);
            let frames = vec![
                image::Frame::from_parts(
                    RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255])),
                    0,
                    0,
                    Delay::from_numer_denom_ms(100, 1),
                ),
                image::Frame::from_parts(
                    RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255])),
                    0,
                    0,
                    Delay::from_numer_denom_ms(250, 1),
                ),
            ];
            encoder.encode_frames(frames).expect("encode gif");
        }

        let mut sprite = AnimatedSprite::from_gif(&bytes).expect("decode gif");
        assert_eq!(sprite.frames().len(), 2);
        assert_eq!(sprite.frames()[0].duration, 100);
        assert_eq!(sprite.frames()[1].duration, 250);
        assert_eq!(sprite.image().dimensions(), (4, 4));
        sprite.update(120);
        assert_eq!(sprite.active_frame_index(), 1);
    }

    #[test]
    fn from_gif_rejects_garbage() {
        assert!(matches!(
            AnimatedSprite::from_gif(b"not a gif"),
            Err(AnimationError::Decode(_))
        ));
    }
}
