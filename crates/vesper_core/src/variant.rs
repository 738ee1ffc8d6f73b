//! Dynamic Values
//!
//! Material parameters, per-instance shader uniforms and global shader
//! parameters all carry loosely typed values. [`Variant`] is the tagged union
//! those tables store, and [`GlobalShaderParameterType`] is the declared type a
//! global parameter is registered with.

use glam::{Affine2, Affine3A, BVec2, BVec3, BVec4, IVec2, IVec3, IVec4, Mat2, Mat3, Mat4, UVec2, UVec3, UVec4, Vec2, Vec3, Vec4};

use crate::math::{Color, Rect2};
use crate::ordinal_enum;
use crate::rid::Rid;

/// Tagged union of every value a shader parameter can hold.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Nil,
    Bool(bool),
    BVec2(BVec2),
    BVec3(BVec3),
    BVec4(BVec4),
    Int(i64),
    IVec2(IVec2),
    IVec3(IVec3),
    IVec4(IVec4),
    UInt(u32),
    UVec2(UVec2),
    UVec3(UVec3),
    UVec4(UVec4),
    Float(f64),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Color(Color),
    Rect2(Rect2),
    Rect2i(IVec4),
    Mat2(Mat2),
    Mat3(Mat3),
    Mat4(Mat4),
    Transform2D(Affine2),
    Transform3D(Affine3A),
    Rid(Rid),
    String(String),
    FloatArray(Vec<f32>),
    IntArray(Vec<i32>),
    Vec2Array(Vec<Vec2>),
    Vec3Array(Vec<Vec3>),
    ColorArray(Vec<Color>),
    RidArray(Vec<Rid>),
}

impl Variant {
    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Variant::Nil)
    }

    /// Short type name for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Nil => "nil",
            Variant::Bool(_) => "bool",
            Variant::BVec2(_) => "bvec2",
            Variant::BVec3(_) => "bvec3",
            Variant::BVec4(_) => "bvec4",
            Variant::Int(_) => "int",
            Variant::IVec2(_) => "ivec2",
            Variant::IVec3(_) => "ivec3",
            Variant::IVec4(_) => "ivec4",
            Variant::UInt(_) => "uint",
            Variant::UVec2(_) => "uvec2",
            Variant::UVec3(_) => "uvec3",
            Variant::UVec4(_) => "uvec4",
            Variant::Float(_) => "float",
            Variant::Vec2(_) => "vec2",
            Variant::Vec3(_) => "vec3",
            Variant::Vec4(_) => "vec4",
            Variant::Color(_) => "color",
            Variant::Rect2(_) => "rect2",
            Variant::Rect2i(_) => "rect2i",
            Variant::Mat2(_) => "mat2",
            Variant::Mat3(_) => "mat3",
            Variant::Mat4(_) => "mat4",
            Variant::Transform2D(_) => "transform2d",
            Variant::Transform3D(_) => "transform3d",
            Variant::Rid(_) => "rid",
            Variant::String(_) => "string",
            Variant::FloatArray(_) => "float[]",
            Variant::IntArray(_) => "int[]",
            Variant::Vec2Array(_) => "vec2[]",
            Variant::Vec3Array(_) => "vec3[]",
            Variant::ColorArray(_) => "color[]",
            Variant::RidArray(_) => "rid[]",
        }
    }

    #[must_use]
    pub fn as_rid(&self) -> Option<Rid> {
        match self {
            Variant::Rid(r) => Some(*r),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Float(f) => Some(*f),
            Variant::Int(i) => Some(*i as f64),
            Variant::UInt(u) => Some(f64::from(*u)),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Texture handles referenced by this value.
    #[must_use]
    pub fn referenced_rids(&self) -> Vec<Rid> {
        match self {
            Variant::Rid(r) if r.is_valid() => vec![*r],
            Variant::RidArray(v) => v.iter().copied().filter(|r| r.is_valid()).collect(),
            _ => Vec::new(),
        }
    }
}

macro_rules! variant_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Variant {
                fn from(v: $ty) -> Self {
                    Variant::$variant(v)
                }
            }
        )*
    };
}

variant_from! {
    bool => Bool,
    i64 => Int,
    u32 => UInt,
    f64 => Float,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    IVec2 => IVec2,
    IVec3 => IVec3,
    IVec4 => IVec4,
    Color => Color,
    Rect2 => Rect2,
    Mat2 => Mat2,
    Mat3 => Mat3,
    Mat4 => Mat4,
    Affine2 => Transform2D,
    Affine3A => Transform3D,
    Rid => Rid,
    String => String,
    Vec<f32> => FloatArray,
    Vec<i32> => IntArray,
    Vec<Rid> => RidArray,
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int(i64::from(v))
    }
}

impl From<f32> for Variant {
    fn from(v: f32) -> Self {
        Variant::Float(f64::from(v))
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_owned())
    }
}

// ============================================================================
// Global shader parameter types
// ============================================================================

ordinal_enum! {
    /// Declared type of a global shader parameter.
    pub enum GlobalShaderParameterType {
        Bool = 0,
        BVec2 = 1,
        BVec3 = 2,
        BVec4 = 3,
        Int = 4,
        IVec2 = 5,
        IVec3 = 6,
        IVec4 = 7,
        Rect2i = 8,
        UInt = 9,
        UVec2 = 10,
        UVec3 = 11,
        UVec4 = 12,
        Float = 13,
        Vec2 = 14,
        Vec3 = 15,
        Vec4 = 16,
        Color = 17,
        Rect2 = 18,
        Mat2 = 19,
        Mat3 = 20,
        Mat4 = 21,
        Transform2D = 22,
        Transform = 23,
        Sampler2D = 24,
        Sampler2DArray = 25,
        Sampler3D = 26,
        SamplerCube = 27,
        SamplerExternal = 28,
    }
}

impl GlobalShaderParameterType {
    /// `true` for the sampler categories, whose values are texture handles.
    #[must_use]
    pub const fn is_sampler(self) -> bool {
        matches!(
            self,
            Self::Sampler2D
                | Self::Sampler2DArray
                | Self::Sampler3D
                | Self::SamplerCube
                | Self::SamplerExternal
        )
    }

    /// Lower-case name as written in shader source.
    #[must_use]
    pub const fn shader_name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::BVec2 => "bvec2",
            Self::BVec3 => "bvec3",
            Self::BVec4 => "bvec4",
            Self::Int => "int",
            Self::IVec2 => "ivec2",
            Self::IVec3 => "ivec3",
            Self::IVec4 => "ivec4",
            Self::Rect2i => "rect2i",
            Self::UInt => "uint",
            Self::UVec2 => "uvec2",
            Self::UVec3 => "uvec3",
            Self::UVec4 => "uvec4",
            Self::Float => "float",
            Self::Vec2 => "vec2",
            Self::Vec3 => "vec3",
            Self::Vec4 => "vec4",
            Self::Color => "color",
            Self::Rect2 => "rect2",
            Self::Mat2 => "mat2",
            Self::Mat3 => "mat3",
            Self::Mat4 => "mat4",
            Self::Transform2D => "transform_2d",
            Self::Transform => "transform",
            Self::Sampler2D => "sampler2D",
            Self::Sampler2DArray => "sampler2DArray",
            Self::Sampler3D => "sampler3D",
            Self::SamplerCube => "samplerCube",
            Self::SamplerExternal => "samplerExternalOES",
        }
    }

    /// Parses the name produced by [`shader_name`](Self::shader_name).
    #[must_use]
    pub fn from_shader_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.shader_name() == name)
    }

    /// Zero value of this type, returned by getters on unknown parameters.
    #[must_use]
    pub fn zero_value(self) -> Variant {
        match self {
            Self::Bool => Variant::Bool(false),
            Self::BVec2 => Variant::BVec2(BVec2::FALSE),
            Self::BVec3 => Variant::BVec3(BVec3::FALSE),
            Self::BVec4 => Variant::BVec4(BVec4::FALSE),
            Self::Int => Variant::Int(0),
            Self::IVec2 => Variant::IVec2(IVec2::ZERO),
            Self::IVec3 => Variant::IVec3(IVec3::ZERO),
            Self::IVec4 => Variant::IVec4(IVec4::ZERO),
            Self::Rect2i => Variant::Rect2i(IVec4::ZERO),
            Self::UInt => Variant::UInt(0),
            Self::UVec2 => Variant::UVec2(UVec2::ZERO),
            Self::UVec3 => Variant::UVec3(UVec3::ZERO),
            Self::UVec4 => Variant::UVec4(UVec4::ZERO),
            Self::Float => Variant::Float(0.0),
            Self::Vec2 => Variant::Vec2(Vec2::ZERO),
            Self::Vec3 => Variant::Vec3(Vec3::ZERO),
            Self::Vec4 => Variant::Vec4(Vec4::ZERO),
            Self::Color => Variant::Color(Color::TRANSPARENT),
            Self::Rect2 => Variant::Rect2(Rect2::ZERO),
            Self::Mat2 => Variant::Mat2(Mat2::IDENTITY),
            Self::Mat3 => Variant::Mat3(Mat3::IDENTITY),
            Self::Mat4 => Variant::Mat4(Mat4::IDENTITY),
            Self::Transform2D => Variant::Transform2D(Affine2::IDENTITY),
            Self::Transform => Variant::Transform3D(Affine3A::IDENTITY),
            Self::Sampler2D
            | Self::Sampler2DArray
            | Self::Sampler3D
            | Self::SamplerCube
            | Self::SamplerExternal => Variant::Rid(Rid::INVALID),
        }
    }

    /// `true` if `value` can be stored in a parameter of this type.
    #[must_use]
    pub fn accepts(self, value: &Variant) -> bool {
        match (self, value) {
            (Self::Bool, Variant::Bool(_))
            | (Self::BVec2, Variant::BVec2(_))
            | (Self::BVec3, Variant::BVec3(_))
            | (Self::BVec4, Variant::BVec4(_))
            | (Self::Int, Variant::Int(_))
            | (Self::IVec2, Variant::IVec2(_))
            | (Self::IVec3, Variant::IVec3(_))
            | (Self::IVec4 | Self::Rect2i, Variant::IVec4(_) | Variant::Rect2i(_))
            | (Self::UInt, Variant::UInt(_) | Variant::Int(_))
            | (Self::UVec2, Variant::UVec2(_))
            | (Self::UVec3, Variant::UVec3(_))
            | (Self::UVec4, Variant::UVec4(_))
            | (Self::Float, Variant::Float(_) | Variant::Int(_))
            | (Self::Vec2, Variant::Vec2(_))
            | (Self::Vec3, Variant::Vec3(_) | Variant::Color(_))
            | (Self::Vec4 | Self::Color, Variant::Vec4(_) | Variant::Color(_))
            | (Self::Rect2, Variant::Rect2(_))
            | (Self::Mat2, Variant::Mat2(_))
            | (Self::Mat3, Variant::Mat3(_))
            | (Self::Mat4, Variant::Mat4(_))
            | (Self::Transform2D, Variant::Transform2D(_))
            | (Self::Transform, Variant::Transform3D(_)) => true,
            (t, Variant::Rid(_)) => t.is_sampler(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_match_declared_values() {
        assert_eq!(GlobalShaderParameterType::Bool.ordinal(), 0);
        assert_eq!(GlobalShaderParameterType::Float.ordinal(), 13);
        assert_eq!(GlobalShaderParameterType::Transform.ordinal(), 23);
        assert_eq!(GlobalShaderParameterType::SamplerExternal.ordinal(), 28);
    }

    #[test]
    fn zero_values_are_accepted_by_their_type() {
        for ty in GlobalShaderParameterType::ALL {
            assert!(ty.accepts(&ty.zero_value()), "{ty:?}");
        }
    }

    #[test]
    fn sampler_accepts_only_rids() {
        let t = GlobalShaderParameterType::Sampler2D;
        assert!(t.accepts(&Variant::Rid(Rid::INVALID)));
        assert!(!t.accepts(&Variant::Float(1.0)));
    }

    #[test]
    fn shader_names_roundtrip() {
        for ty in GlobalShaderParameterType::ALL {
            assert_eq!(GlobalShaderParameterType::from_shader_name(ty.shader_name()), Some(*ty));
        }
    }
}
