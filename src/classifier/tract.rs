use tract_onnx::prelude::*;
use tracing::info;

use super::{
    ClassifierError, ClassifierOptions, InputTensor, InputType, Model, ModelLoader, RawScores,
};

/// Loads ONNX models with `tract-onnx`.
///
/// tract runs a plan on the calling thread and has no intra-op thread knob,
/// so `num_threads` is only reported here.
#[derive(Debug, Default, Clone, Copy)]
pub struct TractLoader;

struct TractModel {
    plan: TypedRunnableModel<TypedModel>,
}

impl ModelLoader for TractLoader {
    fn load(&self, options: &ClassifierOptions) -> Result<Box<dyn Model>, ClassifierError> {
        let path = &options.model_path;
        let shape = options.input_shape();
        let datum_type = match options.input_type {
            InputType::U8 => u8::datum_type(),
            InputType::F32 => f32::datum_type(),
        };

        let load_error = |e: TractError| ClassifierError::ModelLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let fact = InferenceFact::dt_shape(datum_type, shape);
        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(load_error)?
            .with_input_fact(0, fact)
            .map_err(load_error)?
            .into_optimized()
            .map_err(load_error)?
            .into_runnable()
            .map_err(load_error)?;

        info!(
            model = %path.display(),
            input = ?shape,
            threads = options.num_threads,
            "loaded onnx model"
        );
        Ok(Box::new(TractModel { plan }))
    }
}

impl Model for TractModel {
    fn infer(&self, input: &InputTensor) -> Result<RawScores, ClassifierError> {
        let inference = |e: TractError| ClassifierError::Inference(e.to_string());

        let tensor = match input {
            InputTensor::U8(t) => {
                Tensor::from_shape(t.shape(), &t.iter().copied().collect::<Vec<u8>>())
            }
            InputTensor::F32(t) => {
                Tensor::from_shape(t.shape(), &t.iter().copied().collect::<Vec<f32>>())
            }
        }
        .map_err(inference)?;

        let outputs = self.plan.run(tvec!(tensor.into())).map_err(inference)?;
        let output = outputs
            .first()
            .ok_or_else(|| ClassifierError::Inference("model produced no output".to_string()))?;

        if output.datum_type() == u8::datum_type() {
            let scores = output.as_slice::<u8>().map_err(inference)?;
            return Ok(RawScores::U8(scores.to_vec()));
        }

        let scores = output.cast_to::<f32>().map_err(inference)?;
        let scores = scores.as_slice::<f32>().map_err(inference)?;
        Ok(RawScores::F32(scores.to_vec()))
    }
}
