//! Safe wrappers around FFmpeg FFI calls.
//!
//! Every function in this module is `pub` and **safe** to call.  All `unsafe`
//! blocks are contained here with explicit safety arguments.  Callers outside
//! this module should never need to write `unsafe` for routine FFmpeg access.

use ffmpeg_next as ffmpeg;
use std::ffi::{CStr, CString};

// ── Codec-parameter field accessors ─────────────────────────────────────────

/// Read `sample_rate` from an `AVCodecParameters` struct.
///
/// `ffmpeg-next` does not expose this field through a safe accessor.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` returns a valid non-null pointer for the
    // lifetime of `params`.  `sample_rate` is a plain i32 field with no
    // ownership semantics.
    unsafe { (*params.as_ptr()).sample_rate.max(0) as u32 }
}

/// Read `ch_layout` from an `AVCodecParameters` struct.
pub fn codec_params_channel_layout(
    params: &ffmpeg::codec::Parameters,
) -> ffmpeg::ChannelLayout {
    // SAFETY: same as `codec_params_sample_rate`.  The layout is copied by
    // value; for custom-order layouts the `map` pointer stays owned by
    // `params`, and callers only read `nb_channels` / describe it while
    // `params` is alive.
    unsafe { ffmpeg::ChannelLayout::from((*params.as_ptr()).ch_layout) }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::Parameters) -> u16 {
    unsafe { (*params.as_ptr()).ch_layout.nb_channels.max(0) as u16 }
}

/// Read `width` from an `AVCodecParameters` struct.
pub fn codec_params_width(params: &ffmpeg::codec::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).width.max(0) as u32 }
}

/// Read `height` from an `AVCodecParameters` struct.
pub fn codec_params_height(params: &ffmpeg::codec::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).height.max(0) as u32 }
}

/// Read `bit_rate` from an `AVCodecParameters` struct.
pub fn codec_params_bit_rate(params: &ffmpeg::codec::Parameters) -> i64 {
    unsafe { (*params.as_ptr()).bit_rate }
}

/// Read `sample_aspect_ratio` from an `AVCodecParameters` struct.
pub fn codec_params_sample_aspect_ratio(params: &ffmpeg::codec::Parameters) -> ffmpeg::Rational {
    unsafe { ffmpeg::Rational::from((*params.as_ptr()).sample_aspect_ratio) }
}

/// Name of the pixel or sample format stored in `format`, or `"none"`.
pub fn codec_params_format_name(params: &ffmpeg::codec::Parameters) -> String {
    // SAFETY: `format` was written by FFmpeg itself, so any non-negative
    // value is a valid discriminant of the matching enum; the name lookups
    // return null for formats they do not know.
    unsafe {
        let raw = (*params.as_ptr()).format;
        if raw < 0 {
            return "none".to_string();
        }
        let name = match params.medium() {
            ffmpeg::media::Type::Video => ffmpeg::ffi::av_get_pix_fmt_name(std::mem::transmute::<
                i32,
                ffmpeg::ffi::AVPixelFormat,
            >(raw)),
            ffmpeg::media::Type::Audio => ffmpeg::ffi::av_get_sample_fmt_name(
                std::mem::transmute::<i32, ffmpeg::ffi::AVSampleFormat>(raw),
            ),
            _ => std::ptr::null(),
        };
        if name.is_null() {
            "none".to_string()
        } else {
            CStr::from_ptr(name).to_string_lossy().into_owned()
        }
    }
}

/// Fill the video fields of a freshly allocated `AVCodecParameters`.
pub fn codec_params_set_video(
    params: &mut ffmpeg::codec::Parameters,
    codec_id: ffmpeg::codec::Id,
    width: u32,
    height: u32,
    format: ffmpeg::format::Pixel,
    sample_aspect_ratio: ffmpeg::Rational,
) {
    // SAFETY: `params.as_mut_ptr()` is valid for the lifetime of `params`.
    // These are plain scalar fields with no ownership semantics.
    unsafe {
        let p = params.as_mut_ptr();
        (*p).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_VIDEO;
        (*p).codec_id = codec_id.into();
        (*p).width = width as i32;
        (*p).height = height as i32;
        (*p).format = ffmpeg::ffi::AVPixelFormat::from(format) as i32;
        (*p).sample_aspect_ratio = sample_aspect_ratio.into();
    }
}

/// Fill the audio fields of a freshly allocated `AVCodecParameters`.
pub fn codec_params_set_audio(
    params: &mut ffmpeg::codec::Parameters,
    codec_id: ffmpeg::codec::Id,
    sample_rate: u32,
    layout: ffmpeg::ChannelLayout,
    format: ffmpeg::format::Sample,
) {
    // SAFETY: as above.  `av_channel_layout_copy` deep-copies the layout
    // into the struct-owned field, releasing any previous value.
    unsafe {
        let p = params.as_mut_ptr();
        (*p).codec_type = ffmpeg::ffi::AVMediaType::AVMEDIA_TYPE_AUDIO;
        (*p).codec_id = codec_id.into();
        (*p).sample_rate = sample_rate as i32;
        (*p).format = ffmpeg::ffi::AVSampleFormat::from(format) as i32;
        ffmpeg::ffi::av_channel_layout_copy(&mut (*p).ch_layout, &layout.0);
    }
}

/// Zero out `codec_tag` on the `AVCodecParameters` attached to an output
/// stream, so the muxer picks the correct tag for the target container.
///
/// Must be called after `out_stream.set_parameters(...)` and before
/// `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    // SAFETY: `out_stream.as_mut_ptr()` is valid for the lifetime of the
    // stream.  `codecpar` is set by `set_parameters` and is non-null.
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Allocate a fresh `AVCodecParameters`, copy the encoder context into it,
/// and return it as a safe `ffmpeg::codec::Parameters`.
///
/// Used to extract codec parameters from an encoder for muxer stream setup.
pub fn encoder_codec_parameters(ctx: &ffmpeg::codec::Context) -> ffmpeg::codec::Parameters {
    use std::rc::Rc;
    // SAFETY: `avcodec_parameters_alloc` returns a valid pointer or null
    // (OOM only).  `avcodec_parameters_from_context` copies fields from a
    // valid, open encoder context.  The returned wrapper owns `params`.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

/// Set `sample_aspect_ratio` on a video frame; `ffmpeg-next` only exposes
/// the getter.
pub fn frame_set_sample_aspect_ratio(
    frame: &mut ffmpeg::util::frame::Video,
    ratio: ffmpeg::Rational,
) {
    // SAFETY: `frame.as_mut_ptr()` is a valid AVFrame for the lifetime of
    // `frame`; the field is a plain rational.
    unsafe {
        (*frame.as_mut_ptr()).sample_aspect_ratio = ratio.into();
    }
}

// ── Name lookups ────────────────────────────────────────────────────────────

/// Resolve a codec descriptor name (`"h264"`, `"aac"`) to its id.
pub fn codec_id_from_name(name: &str) -> Option<ffmpeg::codec::Id> {
    let cname = CString::new(name).ok()?;
    // SAFETY: the descriptor table is static; the returned pointer is either
    // null or points at an immutable descriptor.
    unsafe {
        let desc = ffmpeg::ffi::avcodec_descriptor_get_by_name(cname.as_ptr());
        if desc.is_null() {
            None
        } else {
            Some(ffmpeg::codec::Id::from((*desc).id))
        }
    }
}

/// Resolve a sample format name (`"fltp"`, `"s16"`).
pub fn sample_format_from_name(name: &str) -> Option<ffmpeg::format::Sample> {
    let cname = CString::new(name).ok()?;
    // SAFETY: `av_get_sample_fmt` only reads the string.
    let fmt = ffmpeg::format::Sample::from(unsafe { ffmpeg::ffi::av_get_sample_fmt(cname.as_ptr()) });
    match fmt {
        ffmpeg::format::Sample::None => None,
        f => Some(f),
    }
}

/// Resolve a pixel format name (`"yuv420p"`).
pub fn pixel_format_from_name(name: &str) -> Option<ffmpeg::format::Pixel> {
    match name.parse::<ffmpeg::format::Pixel>() {
        Ok(ffmpeg::format::Pixel::None) | Err(_) => None,
        Ok(p) => Some(p),
    }
}

/// Name of a pixel format, or `"none"`.
pub fn pixel_format_name(format: ffmpeg::format::Pixel) -> &'static str {
    format.descriptor().map(|d| d.name()).unwrap_or("none")
}

/// Parse a channel layout description (`"stereo"`, `"5.1"`, `"2 channels"`).
pub fn channel_layout_from_name(name: &str) -> Option<ffmpeg::ChannelLayout> {
    let cname = CString::new(name).ok()?;
    // SAFETY: `av_channel_layout_from_string` initialises the zeroed layout
    // or leaves it untouched on error.
    unsafe {
        let mut layout: ffmpeg::ffi::AVChannelLayout = std::mem::zeroed();
        if ffmpeg::ffi::av_channel_layout_from_string(&mut layout, cname.as_ptr()) < 0 {
            return None;
        }
        Some(ffmpeg::ChannelLayout::from(layout))
    }
}

/// Human-readable channel layout description, as understood by
/// [`channel_layout_from_name`] and by the `abuffer` filter.
pub fn channel_layout_name(layout: &ffmpeg::ChannelLayout) -> String {
    let mut buf = [0 as std::ffi::c_char; 128];
    // SAFETY: the buffer is writable for `buf.len()` bytes and
    // `av_channel_layout_describe` always NUL-terminates on success.
    unsafe {
        let ret = ffmpeg::ffi::av_channel_layout_describe(&layout.0, buf.as_mut_ptr(), buf.len());
        if ret < 0 {
            return format!("{} channels", layout.channels());
        }
        CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
    }
}

/// Default video and audio codecs registered for an output container.
pub fn output_format_default_codecs(
    format_name: &str,
) -> Option<(ffmpeg::codec::Id, ffmpeg::codec::Id)> {
    let cname = CString::new(format_name).ok()?;
    // SAFETY: `av_guess_format` returns a pointer into the static muxer
    // registry or null.
    unsafe {
        let ofmt =
            ffmpeg::ffi::av_guess_format(cname.as_ptr(), std::ptr::null(), std::ptr::null());
        if ofmt.is_null() {
            return None;
        }
        Some((
            ffmpeg::codec::Id::from((*ofmt).video_codec),
            ffmpeg::codec::Id::from((*ofmt).audio_codec),
        ))
    }
}

// ── Format-context operations ───────────────────────────────────────────────

/// Seek `stream_index` to `timestamp` (stream time base) with
/// `AVSEEK_FLAG_BACKWARD`, landing at or before the target.
pub fn seek_backward(
    input: &mut ffmpeg::format::context::Input,
    stream_index: usize,
    timestamp: i64,
) -> Result<(), ffmpeg::Error> {
    // SAFETY: `input.as_mut_ptr()` is a valid, opened demuxer context.
    let ret = unsafe {
        ffmpeg::ffi::av_seek_frame(
            input.as_mut_ptr(),
            stream_index as i32,
            timestamp,
            ffmpeg::ffi::AVSEEK_FLAG_BACKWARD,
        )
    };
    if ret < 0 {
        Err(ffmpeg::Error::from(ret))
    } else {
        Ok(())
    }
}

/// Drain the muxer's interleaving queue without writing a new packet.
pub fn flush_interleaved(output: &mut ffmpeg::format::context::Output) -> Result<(), ffmpeg::Error> {
    // SAFETY: a null packet is the documented flush request for
    // `av_interleaved_write_frame`.
    let ret = unsafe {
        ffmpeg::ffi::av_interleaved_write_frame(output.as_mut_ptr(), std::ptr::null_mut())
    };
    if ret < 0 {
        Err(ffmpeg::Error::from(ret))
    } else {
        Ok(())
    }
}

// ── Filter graph parsing ────────────────────────────────────────────────────

/// Parse `expression` into `graph`, binding its open labels to already-created
/// filter contexts.
///
/// `sources` become the graph's open outputs and `sinks` its open inputs.
/// Each list is an ordered sequence of `(label, context name)` pairs; the
/// `AVFilterInOut` chains are built here and always released.
pub fn parse_filter_graph(
    graph: &mut ffmpeg::filter::Graph,
    expression: &str,
    sources: &[(&str, &str)],
    sinks: &[(&str, &str)],
) -> Result<(), ffmpeg::Error> {
    let expression = CString::new(expression).map_err(|_| ffmpeg::Error::InvalidData)?;
    let mut outputs = build_inout_chain(graph, sources)?;
    let mut inputs = match build_inout_chain(graph, sinks) {
        Ok(chain) => chain,
        Err(e) => {
            // SAFETY: `outputs` was allocated by `build_inout_chain`.
            unsafe { ffmpeg::ffi::avfilter_inout_free(&mut outputs) };
            return Err(e);
        }
    };

    // SAFETY: both chains are valid (possibly null) lists owned by us;
    // `avfilter_graph_parse_ptr` consumes the entries it links and leaves the
    // rest for us to free.
    let ret = unsafe {
        let ret = ffmpeg::ffi::avfilter_graph_parse_ptr(
            graph.as_mut_ptr(),
            expression.as_ptr(),
            &mut inputs,
            &mut outputs,
            std::ptr::null_mut(),
        );
        ffmpeg::ffi::avfilter_inout_free(&mut inputs);
        ffmpeg::ffi::avfilter_inout_free(&mut outputs);
        ret
    };

    if ret < 0 {
        Err(ffmpeg::Error::from(ret))
    } else {
        Ok(())
    }
}

fn build_inout_chain(
    graph: &mut ffmpeg::filter::Graph,
    pairs: &[(&str, &str)],
) -> Result<*mut ffmpeg::ffi::AVFilterInOut, ffmpeg::Error> {
    let mut head: *mut ffmpeg::ffi::AVFilterInOut = std::ptr::null_mut();
    let mut tail: *mut ffmpeg::ffi::AVFilterInOut = std::ptr::null_mut();

    for (label, ctx_name) in pairs {
        let found = graph.get(ctx_name);
        let cname = CString::new(*label).ok();
        let (Some(mut ctx), Some(cname)) = (found, cname) else {
            // SAFETY: `head` is null or a chain we allocated.
            unsafe { ffmpeg::ffi::avfilter_inout_free(&mut head) };
            return Err(ffmpeg::Error::FilterNotFound);
        };
        // SAFETY: `avfilter_inout_alloc` returns a zeroed node or null; the
        // label is duplicated with `av_strdup` so the node owns it, and the
        // filter context is owned by `graph`, which outlives the chain.
        unsafe {
            let node = ffmpeg::ffi::avfilter_inout_alloc();
            if node.is_null() {
                ffmpeg::ffi::avfilter_inout_free(&mut head);
                return Err(ffmpeg::Error::from(ffmpeg::ffi::AVERROR(ffmpeg::error::ENOMEM)));
            }
            (*node).name = ffmpeg::ffi::av_strdup(cname.as_ptr());
            (*node).filter_ctx = ctx.as_mut_ptr();
            (*node).pad_idx = 0;
            (*node).next = std::ptr::null_mut();
            if tail.is_null() {
                head = node;
            } else {
                (*tail).next = node;
            }
            tail = node;
        }
    }

    Ok(head)
}

// ── AVIO context management ──────────────────────────────────────────────────

/// Detach the `AVIOContext` (`pb`) from an `AVFormatContext` by setting it to
/// null, preventing the format context's destructor from touching it.
///
/// Call this before dropping an `Output` whose `pb` is owned elsewhere
/// (see `ffmpeg_utils::io`).
pub fn detach_avio(output: &mut ffmpeg::format::context::Output) {
    // SAFETY: `output.as_mut_ptr()` is valid for the lifetime of `output`.
    unsafe {
        let ctx = output.as_mut_ptr();
        if !ctx.is_null() && !(*ctx).pb.is_null() {
            (*ctx).pb = std::ptr::null_mut();
        }
    }
}

// ── Audio plane access ───────────────────────────────────────────────────────

/// Extract an audio plane slice from an `AVFrame`.
///
/// Works around `ffmpeg-next`'s `Audio::data(index)`, which sizes every plane
/// by `linesize[index]`. In FFmpeg, planar audio frames only populate
/// `linesize[0]`, which is the size of *every* plane.
pub fn audio_plane_data(frame: &ffmpeg::util::frame::Audio, index: usize) -> &[u8] {
    unsafe {
        let f = frame.as_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        // Packed audio has only one data plane.
        let is_planar = frame.format().is_planar();
        if is_planar {
            if index >= channels {
                return &[];
            }
        } else if index > 0 {
            return &[];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &[];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &[];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts(plane_ptr, size)
    }
}

/// Mutable version of `audio_plane_data`.
pub fn audio_plane_data_mut(frame: &mut ffmpeg::util::frame::Audio, index: usize) -> &mut [u8] {
    unsafe {
        let f = frame.as_mut_ptr();
        let channels = (*f).ch_layout.nb_channels as usize;

        let is_planar = frame.format().is_planar();
        if is_planar {
            if index >= channels {
                return &mut [];
            }
        } else if index > 0 {
            return &mut [];
        }

        let ptrs = (*f).extended_data;
        if ptrs.is_null() {
            return &mut [];
        }

        let plane_ptr = *ptrs.add(index);
        if plane_ptr.is_null() {
            return &mut [];
        }

        let size = (*f).linesize[0] as usize;
        std::slice::from_raw_parts_mut(plane_ptr, size)
    }
}

/// Reinterpret a mutable raw byte slice from an FLTP audio plane as `&mut [f32]`.
///
/// Returns `None` if the pointer is not 4-byte aligned or the slice is
/// shorter than `sample_count * 4` bytes.
#[cfg(test)]
pub(crate) fn fltp_plane_as_f32_mut(byte_slice: &mut [u8], sample_count: usize) -> Option<&mut [f32]> {
    let expected_bytes = sample_count.checked_mul(4)?;
    if byte_slice.len() < expected_bytes {
        return None;
    }
    let ptr = byte_slice.as_mut_ptr();
    if (ptr as usize) % std::mem::align_of::<f32>() != 0 {
        return None;
    }
    // SAFETY: alignment and length are verified above.  FLTP planes are
    // native-endian f32 values laid out contiguously.
    Some(unsafe { std::slice::from_raw_parts_mut(ptr as *mut f32, sample_count) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_id_from_name() {
        assert_eq!(codec_id_from_name("aac"), Some(ffmpeg::codec::Id::AAC));
        assert_eq!(codec_id_from_name("mpeg4"), Some(ffmpeg::codec::Id::MPEG4));
        assert_eq!(codec_id_from_name("no-such-codec"), None);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(
            sample_format_from_name("fltp"),
            Some(ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar))
        );
        assert_eq!(sample_format_from_name("bogus"), None);
        assert_eq!(
            pixel_format_from_name("yuv420p"),
            Some(ffmpeg::format::Pixel::YUV420P)
        );
        assert_eq!(pixel_format_name(ffmpeg::format::Pixel::YUV420P), "yuv420p");
    }

    #[test]
    fn test_channel_layout_names() {
        let stereo = channel_layout_from_name("stereo").unwrap();
        assert_eq!(stereo.channels(), 2);
        assert_eq!(channel_layout_name(&ffmpeg::ChannelLayout::STEREO), "stereo");
        assert!(channel_layout_from_name("not a layout").is_none());
    }

    #[test]
    fn test_output_format_default_codecs() {
        let (video, _audio) = output_format_default_codecs("matroska").unwrap();
        assert_ne!(video, ffmpeg::codec::Id::None);
        assert!(output_format_default_codecs("no-such-format").is_none());
    }

    #[test]
    fn test_audio_plane_data_planar() {
        let mut frame = ffmpeg::util::frame::Audio::new(
            ffmpeg::format::Sample::F32(ffmpeg::format::sample::Type::Planar),
            64,
            ffmpeg::ChannelLayout::STEREO,
        );
        assert!(audio_plane_data(&frame, 1).len() >= 64 * 4);
        assert!(audio_plane_data(&frame, 2).is_empty());
        let plane = fltp_plane_as_f32_mut(audio_plane_data_mut(&mut frame, 1), 64).unwrap();
        plane[0] = 0.5;
        assert_eq!(&audio_plane_data(&frame, 1)[..4], &0.5f32.to_ne_bytes());
    }
}
