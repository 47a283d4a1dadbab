//! Attachment download and outbound media.

use anyhow::Result;
use gobo_core::utils::{format_text, retry_transport_operation};
use gobo_core::Attachment;
use mime::Mime;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatId, FileId, InputFile, Message, ParseMode};
use tracing::{debug, info};

use super::messaging::{send_long_message, TELEGRAM_CAPTION_LIMIT};

/// Sample rate of raw PCM speech when the media type does not say
pub const DEFAULT_PCM_SAMPLE_RATE: u32 = 24_000;

/// A file referenced by an incoming message, not yet downloaded
#[derive(Debug, Clone)]
pub struct IncomingMedia {
    /// Telegram file id
    pub file_id: FileId,
    /// Media type sent to the model
    pub media_type: Mime,
}

impl IncomingMedia {
    /// Largest size of the photo in `msg`. Telegram re-encodes photos as JPEG.
    #[must_use]
    pub fn photo(msg: &Message) -> Option<Self> {
        msg.photo().and_then(<[_]>::last).map(|photo| Self {
            file_id: photo.file.id.clone(),
            media_type: mime::IMAGE_JPEG,
        })
    }

    /// Voice note or audio file in `msg`
    #[must_use]
    pub fn audio(msg: &Message) -> Option<Self> {
        if let Some(voice) = msg.voice() {
            return Some(Self {
                file_id: voice.file.id.clone(),
                media_type: voice.mime_type.clone().unwrap_or_else(ogg_audio),
            });
        }
        msg.audio().map(|audio| Self {
            file_id: audio.file.id.clone(),
            media_type: audio.mime_type.clone().unwrap_or_else(ogg_audio),
        })
    }

    /// Video in `msg`
    #[must_use]
    pub fn video(msg: &Message) -> Option<Self> {
        msg.video().map(|video| Self {
            file_id: video.file.id.clone(),
            media_type: video.mime_type.clone().unwrap_or_else(mp4_video),
        })
    }

    /// Download the file with retry and wrap it as an attachment.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails after retries.
    pub async fn download(self, bot: &Bot) -> Result<Attachment> {
        let file_id = self.file_id;
        let buffer = retry_transport_operation(|| async {
            let file = bot.get_file(file_id.clone()).await?;
            let mut buf = Vec::new();
            bot.download_file(&file.path, &mut buf).await?;
            Ok(buf)
        })
        .await?;
        debug!(bytes = buffer.len(), media_type = %self.media_type, "Downloaded attachment");
        Ok(Attachment::new(self.media_type, buffer))
    }
}

fn ogg_audio() -> Mime {
    "audio/ogg".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

fn mp4_video() -> Mime {
    "video/mp4".parse().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

/// How an attachment is delivered to the chat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundKind {
    /// `sendPhoto`
    Photo,
    /// `sendVideo`
    Video,
    /// `sendVoice`, OGG/Opus only
    Voice,
    /// `sendAudio`
    Audio,
    /// `sendDocument`
    Document,
}

impl OutboundKind {
    /// Pick the delivery method for a media type
    #[must_use]
    pub fn for_media_type(media_type: &Mime) -> Self {
        let top = media_type.type_();
        if top == mime::IMAGE {
            Self::Photo
        } else if top == mime::VIDEO {
            Self::Video
        } else if top == mime::AUDIO {
            if media_type.subtype().as_str().eq_ignore_ascii_case("ogg") {
                Self::Voice
            } else {
                Self::Audio
            }
        } else {
            Self::Document
        }
    }
}

/// Sample rate if `media_type` is raw 16-bit PCM (`audio/L16`, `audio/pcm`)
#[must_use]
pub fn pcm_sample_rate(media_type: &Mime) -> Option<u32> {
    let subtype = media_type.subtype().as_str();
    let is_pcm = media_type.type_() == mime::AUDIO
        && (subtype.eq_ignore_ascii_case("l16") || subtype.eq_ignore_ascii_case("pcm"));
    is_pcm.then(|| {
        media_type
            .get_param("rate")
            .and_then(|rate| rate.as_str().parse().ok())
            .unwrap_or(DEFAULT_PCM_SAMPLE_RATE)
    })
}

/// Wrap mono 16-bit little-endian PCM in a WAV container
#[must_use]
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate.saturating_mul(u32::from(block_align));
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&data_len.saturating_add(36).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

fn outbound_file(attachment: &Attachment, kind: OutboundKind) -> InputFile {
    if let Some(rate) = pcm_sample_rate(attachment.media_type()) {
        return InputFile::memory(pcm_to_wav(attachment.data(), rate)).file_name("speech.wav");
    }
    let stem = match kind {
        OutboundKind::Photo => "image",
        OutboundKind::Video => "video",
        OutboundKind::Voice | OutboundKind::Audio => "audio",
        OutboundKind::Document => "file",
    };
    let name = format!("{stem}.{}", attachment.media_type().subtype());
    InputFile::memory(attachment.data().to_vec()).file_name(name)
}

/// Send an attachment with an optional Markdown caption.
///
/// Captions over Telegram's limit are sent as a separate message after the
/// media.
///
/// # Errors
///
/// Returns an error if the media or the caption cannot be sent.
pub async fn send_attachment(
    bot: &Bot,
    chat_id: ChatId,
    attachment: &Attachment,
    caption: Option<&str>,
) -> Result<()> {
    let kind = OutboundKind::for_media_type(attachment.media_type());
    let file = outbound_file(attachment, kind);

    let formatted = caption.map(format_text).filter(|c| !c.is_empty());
    let (inline, overflow) = match formatted {
        Some(c) if c.chars().count() <= TELEGRAM_CAPTION_LIMIT => (Some(c), None),
        Some(_) => (None, caption),
        None => (None, None),
    };

    info!(?kind, bytes = attachment.len(), "Sending attachment");
    match kind {
        OutboundKind::Photo => {
            let mut req = bot.send_photo(chat_id, file);
            if let Some(c) = inline {
                req = req.caption(c).parse_mode(ParseMode::Html);
            }
            req.await?;
        }
        OutboundKind::Video => {
            let mut req = bot.send_video(chat_id, file);
            if let Some(c) = inline {
                req = req.caption(c).parse_mode(ParseMode::Html);
            }
            req.await?;
        }
        OutboundKind::Voice => {
            let mut req = bot.send_voice(chat_id, file);
            if let Some(c) = inline {
                req = req.caption(c).parse_mode(ParseMode::Html);
            }
            req.await?;
        }
        OutboundKind::Audio => {
            let mut req = bot.send_audio(chat_id, file);
            if let Some(c) = inline {
                req = req.caption(c).parse_mode(ParseMode::Html);
            }
            req.await?;
        }
        OutboundKind::Document => {
            let mut req = bot.send_document(chat_id, file);
            if let Some(c) = inline {
                req = req.caption(c).parse_mode(ParseMode::Html);
            }
            req.await?;
        }
    }

    if let Some(text) = overflow {
        send_long_message(bot, chat_id, text).await?;
    }
    Ok(())
}
