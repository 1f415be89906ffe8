//! The prediction seam.
//!
//! The prediction function itself is an external collaborator: a pure
//! function from up to three prior baselines (and their server times) to a
//! guessed field image for the new time. The decoder calls it for every live
//! entity before reading updates, because the server encodes its deltas
//! against the same predicted image.

use schema::Schema;

/// Maximum number of baselines handed to the predictor.
pub const MAX_PREDICTION_BASELINES: usize = 3;

/// Inputs to one prediction call.
#[derive(Debug)]
pub struct PredictionInput<'a> {
    /// Schema of the entity being predicted.
    pub schema: &'a Schema,
    /// How many of `baselines`/`times` are valid, `1..=3`.
    pub num_baselines: usize,
    /// Server times of the baselines, oldest last.
    pub times: [i32; MAX_PREDICTION_BASELINES],
    /// Baseline field images, `baselines[0]` being the delta reference.
    pub baselines: [&'a [u8]; MAX_PREDICTION_BASELINES],
    /// Server time of the snapshot being decoded.
    pub new_time: i32,
    /// The entity's replication mask.
    pub field_mask: u8,
}

/// A snapshot predictor.
///
/// Implementations must be pure: same inputs, same outputs, both sides of
/// the wire run it in lock-step.
pub trait Predictor {
    /// Fills `prediction` with the guessed field image for
    /// [`PredictionInput::new_time`] and sets one bit per predicted-changed
    /// field in `fields_changed`.
    fn predict_snapshot(
        &self,
        input: &PredictionInput<'_>,
        prediction: &mut [u8],
        fields_changed: &mut [u8],
    );
}

impl<P: Predictor + ?Sized> Predictor for &P {
    fn predict_snapshot(
        &self,
        input: &PredictionInput<'_>,
        prediction: &mut [u8],
        fields_changed: &mut [u8],
    ) {
        (**self).predict_snapshot(input, prediction, fields_changed);
    }
}

/// The identity predictor: the guess is baseline 0, nothing is flagged as
/// changed. This is also the behaviour when network prediction is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyPredictor;

impl Predictor for CopyPredictor {
    fn predict_snapshot(
        &self,
        input: &PredictionInput<'_>,
        prediction: &mut [u8],
        fields_changed: &mut [u8],
    ) {
        let size = input.schema.byte_size();
        prediction[..size].copy_from_slice(&input.baselines[0][..size]);
        let mask_bytes = input.schema.field_count().div_ceil(8);
        fields_changed[..mask_bytes].fill(0);
    }
}
