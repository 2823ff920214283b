use std::{collections::HashMap, sync::Arc, sync::LazyLock};

use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{
    error::{ImageGenError, Result},
    handler::{
        HandlerContext, ImageHandler, flux, ideogram, kling, kontext, luma, midjourney, minimax,
        openai, replicate, soul, stability,
    },
};

/// A group of models that share one backend integration
///
/// The string form is the key used for per-family configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum BackendFamily {
    Flux,
    FluxUltra,
    Ideogram,
    #[strum(serialize = "openai")]
    OpenAi,
    Stability,
    Luma,
    Minimax,
    Replicate,
    Midjourney,
    FluxKontext,
    Kling,
    Soul,
}

type Constructor = fn(String, Arc<HandlerContext>) -> Box<dyn ImageHandler>;

impl BackendFamily {
    fn constructor(self) -> Constructor {
        match self {
            Self::Flux => flux::create,
            Self::FluxUltra => flux::create_ultra,
            Self::Ideogram => ideogram::create,
            Self::OpenAi => openai::create,
            Self::Stability => stability::create,
            Self::Luma => luma::create,
            Self::Minimax => minimax::create,
            Self::Replicate => replicate::create,
            Self::Midjourney => midjourney::create,
            Self::FluxKontext => kontext::create,
            Self::Kling => kling::create,
            Self::Soul => soul::create,
        }
    }
}

/// Every model id the registry knows, with the family serving it
const MODELS: &[(&str, BackendFamily)] = &[
    ("flux-pro", BackendFamily::Flux),
    ("flux-dev", BackendFamily::Flux),
    ("flux-schnell", BackendFamily::Flux),
    ("flux-pro-v1.1", BackendFamily::Flux),
    ("flux-1-krea", BackendFamily::Flux),
    ("flux-v1.1-ultra", BackendFamily::FluxUltra),
    ("ideogram/V_1", BackendFamily::Ideogram),
    ("ideogram/V_1_TURBO", BackendFamily::Ideogram),
    ("ideogram/V_2", BackendFamily::Ideogram),
    ("ideogram/V_2_TURBO", BackendFamily::Ideogram),
    ("dall-e-3", BackendFamily::OpenAi),
    ("gpt-image-1", BackendFamily::OpenAi),
    ("cogview-4", BackendFamily::OpenAi),
    ("cogview-4-250304", BackendFamily::OpenAi),
    ("doubao-seedream-3-0-t2i-250415", BackendFamily::OpenAi),
    ("sd3", BackendFamily::Stability),
    ("sd3-ultra", BackendFamily::Stability),
    ("sd3.5-large", BackendFamily::Stability),
    ("sd3.5-large-turbo", BackendFamily::Stability),
    ("sd3.5-medium", BackendFamily::Stability),
    ("luma-photon", BackendFamily::Luma),
    ("luma-photon-flash", BackendFamily::Luma),
    ("minimaxi-image-01", BackendFamily::Minimax),
    ("sdxl", BackendFamily::Replicate),
    ("qwen-image", BackendFamily::Replicate),
    ("midjourney/6.1", BackendFamily::Midjourney),
    ("midjourney/7.0", BackendFamily::Midjourney),
    ("nijijourney/6.0", BackendFamily::Midjourney),
    ("flux-kontext-pro", BackendFamily::FluxKontext),
    ("flux-kontext-max", BackendFamily::FluxKontext),
    ("kling-v1", BackendFamily::Kling),
    ("kling-v1-5", BackendFamily::Kling),
    ("kling-v2", BackendFamily::Kling),
    ("soul", BackendFamily::Soul),
];

static REGISTRY: LazyLock<HashMap<&'static str, BackendFamily>> =
    LazyLock::new(|| MODELS.iter().copied().collect());

/// Family serving `model_id`, matched exactly and case-sensitively
pub fn family_of(model_id: &str) -> Option<BackendFamily> {
    REGISTRY.get(model_id).copied()
}

/// All registered model ids in declaration order
pub fn supported_models() -> impl Iterator<Item = &'static str> {
    MODELS.iter().map(|(model_id, _)| *model_id)
}

/// Build the handler for `model_id` on top of its family's context
///
/// `context` is consulted only for a known model; unknown ids never
/// fall back to a generic handler.
pub(crate) fn resolve<F>(model_id: &str, context: F) -> Result<Box<dyn ImageHandler>>
where
    F: FnOnce(BackendFamily) -> Result<Arc<HandlerContext>>,
{
    let family = family_of(model_id).ok_or_else(|| ImageGenError::NotSupported {
        model_id: model_id.to_owned(),
    })?;

    let create = family.constructor();
    Ok(create(model_id.to_owned(), context(family)?))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;
    use crate::handler::test_support::context;

    #[test]
    fn model_ids_are_unique() {
        let unique: HashSet<_> = supported_models().collect();
        assert_eq!(unique.len(), MODELS.len());
    }

    #[test]
    fn every_family_serves_a_model() {
        for family in BackendFamily::iter() {
            assert!(
                MODELS.iter().any(|(_, f)| *f == family),
                "{family} has no registered model"
            );
        }
    }

    #[test]
    fn family_names_round_trip_through_config_keys() {
        assert_eq!(BackendFamily::OpenAi.to_string(), "openai");
        assert_eq!(BackendFamily::FluxKontext.as_ref(), "flux_kontext");
        assert_eq!("flux_ultra".parse::<BackendFamily>().unwrap(), BackendFamily::FluxUltra);
        assert!("open_ai".parse::<BackendFamily>().is_err());
    }

    #[test]
    fn resolves_known_models() {
        let shared = Arc::new(context());

        for model_id in supported_models() {
            let handler = resolve(model_id, |_| Ok(Arc::clone(&shared))).unwrap();
            assert_eq!(handler.model_id(), model_id);
        }
    }

    #[test]
    fn lookup_is_exact() {
        assert_eq!(family_of("midjourney/7.0"), Some(BackendFamily::Midjourney));
        assert_eq!(family_of("Midjourney/7.0"), None);
        assert_eq!(family_of("ideogram"), None);
        assert_eq!(family_of("flux-pro "), None);
    }

    #[test]
    fn unknown_model_is_not_supported() {
        let mut consulted = false;
        let err = resolve("stable-cascade", |_| {
            consulted = true;
            Ok(Arc::new(context()))
        })
        .err()
        .unwrap();

        insta::assert_snapshot!(err, @"model 'stable-cascade' is not supported");
        assert!(!consulted);
    }
}
