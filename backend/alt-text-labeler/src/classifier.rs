//! Decides whether a post should carry the missing-alt-text label

use crate::firehose::{Embed, PostEvent};

/// True when `event` was authored by `target_did` and attaches at least one
/// image whose alt text is absent or empty.
///
/// Pure and total: anything unexpected in the record simply does not qualify.
pub fn classify(event: &PostEvent, target_did: &str) -> bool {
    if event.did != target_did {
        return false;
    }

    match &event.record.embed {
        Some(Embed::Images { images }) => images
            .iter()
            .any(|image| image.alt.as_deref().map_or(true, str::is_empty)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firehose::{EmbedImage, PostRecord};

    const TARGET: &str = "did:plc:target";

    fn image(alt: Option<&str>) -> EmbedImage {
        EmbedImage {
            alt: alt.map(str::to_string),
        }
    }

    fn post(did: &str, embed: Option<Embed>) -> PostEvent {
        PostEvent {
            did: did.to_string(),
            time_us: 1_700_000_000_000_000,
            rkey: "3kxyz".to_string(),
            cid: Some("bafyreiabc".to_string()),
            record: PostRecord { embed },
        }
    }

    fn images(alts: &[Option<&str>]) -> Option<Embed> {
        Some(Embed::Images {
            images: alts.iter().map(|alt| image(*alt)).collect(),
        })
    }

    #[test]
    fn test_empty_alt_qualifies() {
        assert!(classify(&post(TARGET, images(&[Some("")])), TARGET));
    }

    #[test]
    fn test_missing_alt_qualifies() {
        assert!(classify(&post(TARGET, images(&[None])), TARGET));
    }

    #[test]
    fn test_one_bad_image_among_many_qualifies() {
        let embed = images(&[Some("a cat"), Some(""), Some("a dog")]);
        assert!(classify(&post(TARGET, embed), TARGET));
    }

    #[test]
    fn test_all_images_described_does_not_qualify() {
        let embed = images(&[Some("a cat"), Some("a dog")]);
        assert!(!classify(&post(TARGET, embed), TARGET));
    }

    #[test]
    fn test_other_actor_never_qualifies() {
        assert!(!classify(&post("did:plc:other", images(&[Some("")])), TARGET));
        assert!(!classify(&post("did:plc:other", images(&[None])), TARGET));
    }

    #[test]
    fn test_non_image_embeds_do_not_qualify() {
        assert!(!classify(&post(TARGET, None), TARGET));
        assert!(!classify(&post(TARGET, Some(Embed::Other)), TARGET));
        assert!(!classify(&post(TARGET, images(&[])), TARGET));
    }

    #[test]
    fn test_whitespace_alt_counts_as_present() {
        assert!(!classify(&post(TARGET, images(&[Some(" ")])), TARGET));
    }
}
