//! Application media arrays and their wire payloads.
//!
//! Video frames are packed BGR24, one payload per frame. Audio is f32 mono;
//! the samples for one push are paced into one chunk per video frame.

use std::ops::Range;

use bytes::Bytes;
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Dimension};

use rawcast_ipc::Resolution;

use crate::error::EngineError;
use crate::EngineResult;

/// Element type of a [`MediaArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    I16,
    F32,
    F64,
}

impl SampleType {
    /// Returns the conventional short name.
    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I16 => "int16",
            Self::F32 => "float32",
            Self::F64 => "float64",
        }
    }
}

/// An n-dimensional array of any supported element type.
///
/// Video is expected as `(height, width, 3)` or `(n, height, width, 3)` u8;
/// audio as a 1-D f32 buffer. Other shapes and element types are rejected by
/// `push` rather than by the type system so callers holding decoded media of
/// unknown layout get a descriptive error.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaArray {
    U8(ArrayD<u8>),
    I16(ArrayD<i16>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

impl MediaArray {
    /// Element type.
    pub fn sample_type(&self) -> SampleType {
        match self {
            Self::U8(_) => SampleType::U8,
            Self::I16(_) => SampleType::I16,
            Self::F32(_) => SampleType::F32,
            Self::F64(_) => SampleType::F64,
        }
    }

    /// Array shape.
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::U8(a) => a.shape(),
            Self::I16(a) => a.shape(),
            Self::F32(a) => a.shape(),
            Self::F64(a) => a.shape(),
        }
    }

    /// Number of axes.
    pub fn ndim(&self) -> usize {
        self.shape().len()
    }
}

macro_rules! impl_from_array {
    ($elem:ty, $variant:ident) => {
        impl<D: Dimension> From<Array<$elem, D>> for MediaArray {
            fn from(array: Array<$elem, D>) -> Self {
                Self::$variant(array.into_dyn())
            }
        }
    };
}

impl_from_array!(u8, U8);
impl_from_array!(i16, I16);
impl_from_array!(f32, F32);
impl_from_array!(f64, F64);

impl From<Vec<f32>> for MediaArray {
    fn from(samples: Vec<f32>) -> Self {
        Self::F32(Array::from_vec(samples).into_dyn())
    }
}

/// Check a video array against the configured resolution and split it into
/// one payload per frame.
pub fn video_payloads(video: &MediaArray, resolution: Resolution) -> EngineResult<Vec<Bytes>> {
    let shape = video.shape();
    let (height, width) = (resolution.height as usize, resolution.width as usize);

    let shape_ok = matches!(shape.len(), 3 | 4)
        && shape[shape.len() - 3] == height
        && shape[shape.len() - 2] == width
        && shape[shape.len() - 1] == 3;

    if !shape_ok {
        return Err(EngineError::Shape(format!(
            "video frames must be shape ({h}, {w}, 3) or (n, {h}, {w}, 3), got {:?}",
            shape,
            h = height,
            w = width,
        )));
    }

    let frames = match video {
        MediaArray::U8(frames) => frames,
        other => {
            return Err(EngineError::Shape(format!(
                "video frames must be uint8, got {}",
                other.sample_type().name()
            )))
        }
    };

    if frames.ndim() == 3 {
        return Ok(vec![frame_bytes(frames.view())]);
    }

    Ok(frames.axis_iter(Axis(0)).map(frame_bytes).collect())
}

fn frame_bytes(frame: ArrayViewD<'_, u8>) -> Bytes {
    match frame.as_slice() {
        Some(slice) => Bytes::copy_from_slice(slice),
        None => Bytes::from(frame.iter().copied().collect::<Vec<u8>>()),
    }
}

/// Number of audio samples that cover `frames` video frames.
pub fn expected_samples(sample_rate: u32, fps: f64, frames: usize) -> usize {
    if fps.fract() == 0.0 && fps >= 1.0 {
        (sample_rate as u64 * frames as u64 / fps as u64) as usize
    } else {
        (sample_rate as f64 * frames as f64 / fps).floor() as usize
    }
}

/// Resolve the audio for one push into a flat sample buffer.
///
/// Missing audio becomes silence of the expected length. With
/// `check_duration` the buffer is truncated or zero-padded to `expected`.
pub fn audio_samples(
    audio: Option<&MediaArray>,
    expected: usize,
    check_duration: bool,
) -> EngineResult<Vec<f32>> {
    let mut samples = match audio {
        None => vec![0.0; expected],
        Some(MediaArray::F32(array)) if array.ndim() == 1 => array.iter().copied().collect(),
        Some(other) => {
            return Err(EngineError::Dtype(format!(
                "audio frames must be a 1-D float32 array, got {}-D {}",
                other.ndim(),
                other.sample_type().name()
            )))
        }
    };

    if check_duration {
        samples.resize(expected, 0.0);
    }

    Ok(samples)
}

/// Split `len` items into `parts` contiguous ranges whose sizes differ by at
/// most one, with the larger ranges first.
pub fn split_even(len: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }

    let base = len / parts;
    let extra = len % parts;
    let mut start = 0;

    (0..parts)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// Pace `samples` into `frames` chunk payloads of native-endian f32.
pub fn audio_payloads(samples: &[f32], frames: usize) -> Vec<Bytes> {
    split_even(samples.len(), frames)
        .into_iter()
        .map(|range| Bytes::copy_from_slice(bytemuck::cast_slice(&samples[range])))
        .collect()
}
