//! The typed IR's type system: an interning table mapping type descriptors to cheap,
//! copyable [`Type`] handles.
//!
//! Types are never compared structurally once built: every place that needs to know
//! whether two values have the same type compares two `Type` handles, which is a single
//! integer comparison. This mirrors how the render graph nodes themselves are addressed
//! through `slotmap` keys rather than through the objects they point to.
use ash::vk;
use slotmap::{new_key_type, SlotMap};
use std::collections::HashMap;
use std::marker::PhantomData;

new_key_type! {
    /// An interned type handle. Cheap to copy, compare, and hash.
    pub struct Type;
}

/// Scalar element kinds that make up the builtin types.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Scalar {
    F32,
    U32,
    I32,
}

/// How a `call` node's parameter is allowed to touch the resource behind an [`TypeDescriptor::Imbued`]
/// wrapper. Backs the access taxonomy the recorder uses to pick access/stage masks for a use.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AccessQualifier {
    Read,
    Write,
    ReadWrite,
    /// Bound as a render pass color/depth attachment rather than sampled or read/written
    /// directly by a shader.
    FramebufferAttachment,
}

/// The structural description of a type, as stored in the interning table.
///
/// Two values with `TypeDescriptor`s that compare equal are always interned to the
/// same [`Type`] handle.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum TypeDescriptor {
    /// An opaque Vulkan image resource.
    Image,
    /// A range of a Vulkan buffer, typed by the element it is meant to be viewed as.
    Buffer { element: Scalar },
    /// A Vulkan sampler object.
    Sampler,
    /// An image bound together with a sampler for shader access.
    SampledImage,
    /// A presentable swapchain image.
    Swapchain,
    /// `*T`: a pointer-sized handle to a value of the pointee type.
    Pointer { pointee: Type },
    /// `[T; N]`: N contiguous values of the element type.
    Array { element: Type, len: u32 },
    /// A named aggregate of fields, used for the inputs/outputs of `call` nodes. The name makes
    /// two structurally identical but semantically distinct composites (e.g. two different
    /// vertex layouts that both happen to be two `F32` buffers) intern to different handles.
    Composite { name: String, fields: Vec<Type> },
    /// Wraps `inner` with the access mode a `call` parameter is allowed to use it with. This is
    /// what lets the recorder's access taxonomy (read/write/sampled/framebuffer-attachment) be
    /// read off a `call`'s input types instead of being declared out-of-band.
    Imbued { inner: Type, access: AccessQualifier },
    /// A host-callable function with no shader stage of its own (e.g. a blit or buffer-copy
    /// helper invoked from a `call` node whose `PipelineDescriptor` has no shader stages).
    OpaqueFunction { params: Vec<Type>, returns: Vec<Type> },
    /// A compiled shader entry point, typed by its parameter list.
    ShaderFunction { params: Vec<Type>, entry_point: String },
}

/// A typed, zero-sized marker for a `Buffer` interned with a particular Rust element type.
///
/// Mirrors the host-side `Buffer` view shape: callers that know the element type at compile
/// time can get a `Buffer<T>` and let the type checker catch element-type mismatches before
/// they ever reach the IR.
#[derive(Copy, Clone)]
pub struct Buffer<T> {
    pub ty: Type,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Buffer<T> {
    fn new(ty: Type) -> Self {
        Buffer { ty, _marker: PhantomData }
    }
}

/// Owns the interning table for a runtime. One `TypeInterner` per [`crate::Runtime`].
pub struct TypeInterner {
    types: SlotMap<Type, TypeDescriptor>,
    by_descriptor: HashMap<TypeDescriptor, Type>,
    image: Type,
    sampler: Type,
    sampled_image: Type,
    swapchain: Type,
}

impl TypeInterner {
    pub fn new() -> TypeInterner {
        let mut types = SlotMap::with_key();
        let mut by_descriptor = HashMap::new();

        let mut intern_builtin = |types: &mut SlotMap<Type, TypeDescriptor>, desc: TypeDescriptor| {
            let ty = types.insert(desc.clone());
            by_descriptor.insert(desc, ty);
            ty
        };

        let image = intern_builtin(&mut types, TypeDescriptor::Image);
        let sampler = intern_builtin(&mut types, TypeDescriptor::Sampler);
        let sampled_image = intern_builtin(&mut types, TypeDescriptor::SampledImage);
        let swapchain = intern_builtin(&mut types, TypeDescriptor::Swapchain);

        TypeInterner {
            types,
            by_descriptor,
            image,
            sampler,
            sampled_image,
            swapchain,
        }
    }

    /// Interns `desc`, returning the existing handle if an identical descriptor was already
    /// registered.
    pub fn intern(&mut self, desc: TypeDescriptor) -> Type {
        if let Some(&ty) = self.by_descriptor.get(&desc) {
            return ty;
        }
        let ty = self.types.insert(desc.clone());
        self.by_descriptor.insert(desc, ty);
        ty
    }

    pub fn image(&self) -> Type {
        self.image
    }

    pub fn sampler(&self) -> Type {
        self.sampler
    }

    pub fn sampled_image(&self) -> Type {
        self.sampled_image
    }

    pub fn swapchain(&self) -> Type {
        self.swapchain
    }

    /// Interns a typed buffer view of `element`.
    pub fn make_buffer_ty<T>(&mut self, element: Scalar) -> Buffer<T> {
        Buffer::new(self.intern(TypeDescriptor::Buffer { element }))
    }

    pub fn make_pointer_ty(&mut self, pointee: Type) -> Type {
        self.intern(TypeDescriptor::Pointer { pointee })
    }

    pub fn make_array_ty(&mut self, element: Type, len: u32) -> Type {
        self.intern(TypeDescriptor::Array { element, len })
    }

    pub fn make_composite(&mut self, name: impl Into<String>, fields: Vec<Type>) -> Type {
        self.intern(TypeDescriptor::Composite { name: name.into(), fields })
    }

    /// Wraps `inner` with an access qualifier, for use as a `call` node parameter type.
    pub fn make_imbued(&mut self, inner: Type, access: AccessQualifier) -> Type {
        self.intern(TypeDescriptor::Imbued { inner, access })
    }

    pub fn make_opaque_function(&mut self, params: Vec<Type>, returns: Vec<Type>) -> Type {
        self.intern(TypeDescriptor::OpaqueFunction { params, returns })
    }

    pub fn make_shader_function(&mut self, params: Vec<Type>, entry_point: impl Into<String>) -> Type {
        self.intern(TypeDescriptor::ShaderFunction {
            params,
            entry_point: entry_point.into(),
        })
    }

    /// Returns the descriptor a handle was interned from.
    pub fn get(&self, ty: Type) -> &TypeDescriptor {
        &self.types[ty]
    }

    /// If `ty` is wrapped in an access qualifier, returns the inner type; otherwise returns `ty`
    /// unchanged.
    ///
    /// Used when resolving the value type a `call` parameter is bound to back to the plain
    /// resource type underneath the access qualifier it was imbued with.
    pub fn stripped(&self, ty: Type) -> Type {
        match self.get(ty) {
            TypeDescriptor::Imbued { inner, .. } => *inner,
            _ => ty,
        }
    }

    /// The type of field `field_index` of composite type `ty`, or `None` if `ty` is not a
    /// composite or the index is out of range. Backs `get(value, field_index)` field projection:
    /// an IR builder calls this to learn a field-access node's output type before emplacing it.
    pub fn field_type(&self, ty: Type, field_index: usize) -> Option<Type> {
        match self.get(ty) {
            TypeDescriptor::Composite { fields, .. } => fields.get(field_index).copied(),
            _ => None,
        }
    }

    /// The size in bytes of a type, where defined (scalars, arrays, composites of sized
    /// fields). Opaque resource types (`Image`, `Sampler`, ...) have no meaningful size and
    /// this returns `None` for them.
    pub fn size(&self, ty: Type) -> Option<u64> {
        match self.get(ty) {
            TypeDescriptor::Buffer { element } => Some(scalar_size(*element)),
            TypeDescriptor::Array { element, len } => self.size(*element).map(|s| s * *len as u64),
            TypeDescriptor::Composite { fields, .. } => {
                let mut total = 0u64;
                for &f in fields {
                    total += self.size(f)?;
                }
                Some(total)
            }
            TypeDescriptor::Pointer { .. } => Some(8),
            TypeDescriptor::Imbued { inner, .. } => self.size(*inner),
            _ => None,
        }
    }

    /// The alignment in bytes required by a type, following the same rules as [`size`](Self::size).
    pub fn align(&self, ty: Type) -> Option<u64> {
        match self.get(ty) {
            TypeDescriptor::Buffer { element } => Some(scalar_size(*element)),
            TypeDescriptor::Array { element, .. } => self.align(*element),
            TypeDescriptor::Composite { fields, .. } => fields.iter().filter_map(|&f| self.align(f)).max(),
            TypeDescriptor::Pointer { .. } => Some(8),
            TypeDescriptor::Imbued { inner, .. } => self.align(*inner),
            _ => None,
        }
    }
}

impl Default for TypeInterner {
    fn default() -> Self {
        Self::new()
    }
}

fn scalar_size(s: Scalar) -> u64 {
    match s {
        Scalar::F32 | Scalar::U32 | Scalar::I32 => 4,
    }
}

/// An RGBA-ish aggregate convenience type pairing an image with the metadata needed to
/// sample or blit it, mirroring a host-side "texture" view over an [`crate::resource`] image.
#[derive(Copy, Clone, Debug)]
pub struct TextureView {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent3D,
    pub format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_descriptors_intern_to_the_same_handle() {
        let mut interner = TypeInterner::new();
        let a = interner.intern(TypeDescriptor::Buffer { element: Scalar::F32 });
        let b = interner.intern(TypeDescriptor::Buffer { element: Scalar::F32 });
        assert_eq!(a, b);
        let c = interner.intern(TypeDescriptor::Buffer { element: Scalar::U32 });
        assert_ne!(a, c);
    }

    #[test]
    fn stripped_unwraps_one_level_of_imbued_access() {
        let mut interner = TypeInterner::new();
        let image = interner.image();
        let imbued = interner.make_imbued(image, AccessQualifier::Read);
        assert_eq!(interner.stripped(imbued), image);
        assert_eq!(interner.stripped(image), image);

        // stripped does not unwrap plain pointers, only access qualifiers
        let ptr = interner.make_pointer_ty(image);
        assert_eq!(interner.stripped(ptr), ptr);
    }

    #[test]
    fn field_type_projects_composite_fields() {
        let mut interner = TypeInterner::new();
        let f32_buf = interner.intern(TypeDescriptor::Buffer { element: Scalar::F32 });
        let u32_buf = interner.intern(TypeDescriptor::Buffer { element: Scalar::U32 });
        let composite = interner.make_composite("vertex", vec![f32_buf, u32_buf]);
        assert_eq!(interner.field_type(composite, 0), Some(f32_buf));
        assert_eq!(interner.field_type(composite, 1), Some(u32_buf));
        assert_eq!(interner.field_type(composite, 2), None);
        assert_eq!(interner.field_type(f32_buf, 0), None);
    }

    #[test]
    fn array_size_multiplies_element_size() {
        let mut interner = TypeInterner::new();
        let f32_buf = interner.intern(TypeDescriptor::Buffer { element: Scalar::F32 });
        let arr = interner.make_array_ty(f32_buf, 4);
        assert_eq!(interner.size(arr), Some(16));
    }
}
