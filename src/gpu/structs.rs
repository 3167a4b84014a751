use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

use super::driver::types::Format;

#[cfg(feature = "keel-serde")]
use serde::{Deserialize, Serialize};

pub const MAX_COLOR_TARGETS: usize = 8;
pub const MAX_VERTEX_STREAMS: usize = 16;
pub const MAX_VERTEX_ATTRIBUTES: usize = 16;
pub const MAX_DESCRIPTOR_SETS: usize = 4;
pub const MAX_VIEWPORTS: usize = 16;

#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum BlendFactor {
    One,
    Zero,
    SrcColor,
    InvSrcColor,
    #[default]
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
    DstColor,
    InvDstColor,
    BlendFactor,
}

#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    InvSubtract,
    Min,
    Max,
}

#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum LoadOp {
    Load,
    Clear,
    #[default]
    DontCare,
}

#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum StoreOp {
    #[default]
    Store,
    DontCare,
}

#[derive(Hash, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum SampleCount {
    #[default]
    S1,
    S2,
    S4,
    S8,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct FRect2D {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    pub area: FRect2D,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            area: FRect2D {
                x: 0.0,
                y: 0.0,
                w: 1024.0,
                h: 1024.0,
            },
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

impl Viewport {
    pub fn from_rect(rect: Rect2D) -> Self {
        Self {
            area: FRect2D {
                x: rect.x as f32,
                y: rect.y as f32,
                w: rect.w as f32,
                h: rect.h as f32,
            },
            ..Default::default()
        }
    }
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    PatchList,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum CullMode {
    None,
    #[default]
    Back,
    Front,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum VertexOrdering {
    CounterClockwise,
    #[default]
    Clockwise,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum CompareOp {
    Never,
    Less,
    Equal,
    #[default]
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
    Always,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrementClamp,
    DecrementClamp,
    Invert,
    IncrementWrap,
    DecrementWrap,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct StencilFaceState {
    pub fail: StencilOp,
    pub pass: StencilOp,
    pub depth_fail: StencilOp,
    pub compare: CompareOp,
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct WriteMask {
    pub r: bool,
    pub g: bool,
    pub b: bool,
    pub a: bool,
}

impl Default for WriteMask {
    fn default() -> Self {
        Self {
            r: true,
            g: true,
            b: true,
            a: true,
        }
    }
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct ColorBlendState {
    pub enable: bool,
    pub src_blend: BlendFactor,
    pub dst_blend: BlendFactor,
    pub blend_op: BlendOp,
    pub src_alpha_blend: BlendFactor,
    pub dst_alpha_blend: BlendFactor,
    pub alpha_blend_op: BlendOp,
    pub write_mask: WriteMask,
}

impl Default for ColorBlendState {
    fn default() -> Self {
        Self {
            enable: false,
            src_blend: BlendFactor::SrcAlpha,
            dst_blend: BlendFactor::InvSrcAlpha,
            blend_op: BlendOp::Add,
            src_alpha_blend: BlendFactor::SrcAlpha,
            dst_alpha_blend: BlendFactor::InvSrcAlpha,
            alpha_blend_op: BlendOp::Add,
            write_mask: Default::default(),
        }
    }
}

impl ColorBlendState {
    pub fn alpha_blended() -> Self {
        Self {
            enable: true,
            ..Default::default()
        }
    }
}

/// Blend state for every color target. Only the first `target_count` entries
/// of the bound render target are consumed.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct BlendState {
    pub independent: bool,
    pub targets: [ColorBlendState; MAX_COLOR_TARGETS],
}

impl BlendState {
    pub fn uniform(state: ColorBlendState) -> Self {
        Self {
            independent: false,
            targets: [state; MAX_COLOR_TARGETS],
        }
    }

    pub fn target(&self, index: usize) -> &ColorBlendState {
        if self.independent {
            &self.targets[index]
        } else {
            &self.targets[0]
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct RasterizationState {
    pub culling: CullMode,
    pub front_face: VertexOrdering,
    pub polygon_mode: PolygonMode,
    pub depth_clamp: bool,
    pub depth_bias: i32,
    pub depth_bias_slope: f32,
    pub line_width: f32,
}

impl Default for RasterizationState {
    fn default() -> Self {
        Self {
            culling: CullMode::Back,
            front_face: VertexOrdering::Clockwise,
            polygon_mode: PolygonMode::Fill,
            depth_clamp: false,
            depth_bias: 0,
            depth_bias_slope: 0.0,
            line_width: 1.0,
        }
    }
}

// Float fields compare by bit pattern so the state can key a hash map.
impl Eq for RasterizationState {}

impl Hash for RasterizationState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.culling.hash(state);
        self.front_face.hash(state);
        self.polygon_mode.hash(state);
        self.depth_clamp.hash(state);
        self.depth_bias.hash(state);
        self.depth_bias_slope.to_bits().hash(state);
        self.line_width.to_bits().hash(state);
    }
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub stencil_test: bool,
    pub front: StencilFaceState,
    pub back: StencilFaceState,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareOp::LessOrEqual,
            stencil_test: false,
            front: Default::default(),
            back: Default::default(),
            stencil_read_mask: 0xff,
            stencil_write_mask: 0xff,
        }
    }
}

impl DepthStencilState {
    pub fn disabled() -> Self {
        Self {
            depth_test: false,
            depth_write: false,
            ..Default::default()
        }
    }
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub struct MultisampleState {
    pub sample_mask: u32,
    pub alpha_to_coverage: bool,
}

impl Default for MultisampleState {
    fn default() -> Self {
        Self {
            sample_mask: u32::MAX,
            alpha_to_coverage: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    Color([f32; 4]),
    IntColor([i32; 4]),
    UintColor([u32; 4]),
    DepthStencil { depth: f32, stencil: u32 },
}

impl Default for ClearValue {
    fn default() -> Self {
        ClearValue::Color([0.0; 4])
    }
}

impl Hash for ClearValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ClearValue::Color(vals) => {
                0u8.hash(state); // variant tag
                for v in vals {
                    v.to_bits().hash(state); // preserve NaNs and -0.0 vs 0.0
                }
            }
            ClearValue::IntColor(vals) => {
                1u8.hash(state);
                vals.hash(state);
            }
            ClearValue::UintColor(vals) => {
                2u8.hash(state);
                vals.hash(state);
            }
            ClearValue::DepthStencil { depth, stencil } => {
                3u8.hash(state);
                depth.to_bits().hash(state);
                stencil.hash(state);
            }
        }
    }
}

#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "keel-serde", derive(Serialize, Deserialize))]
pub enum VertexRate {
    #[default]
    Vertex,
    Instance,
}

/// One vertex-fetch binding slot of a pipeline.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub rate: VertexRate,
}

/// One shader input location fed from a binding slot.
#[derive(Hash, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

/// Compact vertex-input layout baked into a pipeline.
#[derive(Hash, Debug, Clone, PartialEq, Eq, Default)]
pub struct VertexInputLayout {
    pub bindings: SmallVec<[VertexBinding; 4]>,
    pub attributes: SmallVec<[VertexAttribute; 8]>,
}

impl VertexInputLayout {
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Formats of everything a pipeline renders into. Pipelines compiled for
/// one signature can be used with any render target sharing it.
#[derive(Hash, Debug, Clone, PartialEq, Eq, Default)]
pub struct RenderTargetSignature {
    pub color_formats: SmallVec<[Format; MAX_COLOR_TARGETS]>,
    pub depth_format: Format,
    pub samples: SampleCount,
    /// Multiview mask, zero when multiview is off.
    pub view_mask: u32,
}

impl RenderTargetSignature {
    pub fn has_depth(&self) -> bool {
        self.depth_format != Format::Unknown
    }
}
