/// Declares a typed resource handle.
///
/// Without a body the handle names an opaque resource type whose payload is
/// materialized by a consumer's loader:
///
/// ```
/// resource::define_resource! {
///     pub struct Image("image");
/// }
/// ```
///
/// With a body every field becomes a property of a compiled schema. Fields
/// declared `mut` get a `set_<field>` method; the others can only be given at
/// construction. Defaults follow `=` and extra declaration flags go in a
/// `#[prop(..)]` attribute after the doc comments:
///
/// ```
/// use resource::kinds::{Ref, Rgba, Str, F32};
///
/// resource::define_resource! {
///     pub struct Texture("texture");
/// }
///
/// resource::define_resource! {
///     pub struct Material("material") {
///         /// Display name.
///         mut name: Str = "material".to_owned(),
///         mut base_color_factor: Rgba = [1.0; 4],
///         #[prop(script, min(0.0), max(1.0))]
///         mut metallic_factor: F32 = 1.0,
///         mut base_color_texture: Ref<Texture>,
///     }
/// }
/// ```
///
/// This generates `Material`, a `MaterialProps` struct of optional initial
/// values, `Material::create`, one getter per field and one setter per
/// `mut` field.
#[macro_export]
macro_rules! define_resource {
    (@mutability $prop:ident mutable) => {
        $prop
    };
    (@mutability $prop:ident) => {
        $prop.immutable()
    };

    (@setter mutable $field:ident $ty:ty) => {
        $crate::__private::paste! {
            pub fn [<set_ $field>](
                self,
                manager: &mut $crate::ResourceManager,
                value: <$ty as $crate::kinds::PropAccess>::Input,
            ) -> $crate::ResourceResult<()> {
                manager.set_prop(
                    self.0,
                    stringify!($field),
                    <$ty as $crate::kinds::PropAccess>::into_value(value),
                )
            }
        }
    };

    (@fields $vis:vis $name:ident $type_name:literal [$($done:tt)*]
        $(#[doc = $doc:expr])*
        $(#[prop($($opt:ident $(($arg:expr))?),+ $(,)?)])?
        mut $field:ident : $ty:ty $(= $default:expr)?
        $(, $($rest:tt)*)?
    ) => {
        $crate::define_resource!(@fields $vis $name $type_name
            [$($done)* {
                [$(#[doc = $doc])*] $field : $ty,
                [mutable],
                [$($default)?],
                [$($($opt $(($arg))?),+)?]
            }]
            $($($rest)*)?
        );
    };

    (@fields $vis:vis $name:ident $type_name:literal [$($done:tt)*]
        $(#[doc = $doc:expr])*
        $(#[prop($($opt:ident $(($arg:expr))?),+ $(,)?)])?
        $field:ident : $ty:ty $(= $default:expr)?
        $(, $($rest:tt)*)?
    ) => {
        $crate::define_resource!(@fields $vis $name $type_name
            [$($done)* {
                [$(#[doc = $doc])*] $field : $ty,
                [],
                [$($default)?],
                [$($($opt $(($arg))?),+)?]
            }]
            $($($rest)*)?
        );
    };

    (@fields $vis:vis $name:ident $type_name:literal [$({
        [$($doc:tt)*] $field:ident : $ty:ty,
        [$($mutable:ident)?],
        [$($default:expr)?],
        [$($($opt:ident $(($arg:expr))?),+)?]
    })*]) => {
        $crate::__private::paste! {
            #[doc = concat!("Initial property values for [`", stringify!($name), "`].")]
            #[derive(Default)]
            $vis struct [<$name Props>] {
                $(
                    $($doc)*
                    pub $field: ::std::option::Option<<$ty as $crate::kinds::PropAccess>::Input>,
                )*
            }

            impl $crate::SchemaResource for $name {
                fn definition() -> &'static ::std::sync::Arc<$crate::ResourceDefinition> {
                    static DEFINITION: ::std::sync::OnceLock<::std::sync::Arc<$crate::ResourceDefinition>> =
                        ::std::sync::OnceLock::new();
                    DEFINITION.get_or_init(|| {
                        let builder = $crate::ResourceDefinition::builder($type_name);
                        $(
                            let builder = builder.prop(stringify!($field), {
                                let prop = <$ty as $crate::kinds::PropAccess>::declare();
                                $(
                                    let prop = prop.with_default(
                                        <$ty as $crate::kinds::PropAccess>::into_value($default),
                                    );
                                )?
                                $($(let prop = prop.$opt($($arg)?);)+)?
                                $crate::define_resource!(@mutability prop $($mutable)?)
                            });
                        )*
                        match builder.compile() {
                            Ok(definition) => ::std::sync::Arc::new(definition),
                            Err(err) => panic!("resource `{}` has an invalid schema: {}", $type_name, err),
                        }
                    })
                }
            }

            impl $name {
                pub fn create(
                    manager: &mut $crate::ResourceManager,
                    props: [<$name Props>],
                ) -> $crate::ResourceResult<Self> {
                    Self::create_with(manager, props, $crate::ResourceOptions::default())
                }

                #[allow(unused_mut, unused_variables)]
                pub fn create_with(
                    manager: &mut $crate::ResourceManager,
                    props: [<$name Props>],
                    options: $crate::ResourceOptions,
                ) -> $crate::ResourceResult<Self> {
                    let mut values: ::std::vec::Vec<(&'static str, $crate::PropValue)> =
                        ::std::vec::Vec::new();
                    $(
                        if let ::std::option::Option::Some(value) = props.$field {
                            values.push((
                                stringify!($field),
                                <$ty as $crate::kinds::PropAccess>::into_value(value),
                            ));
                        }
                    )*
                    let definition = <Self as $crate::SchemaResource>::definition().clone();
                    manager.create_instance(definition, values, options).map(Self)
                }

                /// Every live instance on the producer, in creation order.
                pub fn all(manager: &$crate::ResourceManager) -> ::std::vec::Vec<Self> {
                    manager.resource_ids_by_type($type_name).map(Self).collect()
                }

                $(
                    $($doc)*
                    pub fn $field<'v, V: $crate::ResourceView + ?Sized>(
                        self,
                        view: &'v V,
                    ) -> $crate::ResourceResult<<$ty as $crate::kinds::PropAccess>::Output<'v>> {
                        $crate::kinds::read_prop::<$ty, V>(
                            view,
                            self.0,
                            <Self as $crate::SchemaResource>::definition(),
                            stringify!($field),
                        )
                    }

                    $($crate::define_resource!(@setter $mutable $field $ty);)?
                )*
            }
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($type_name:literal);
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        $vis struct $name($crate::ResourceId);

        impl $crate::ResourceClass for $name {
            const NAME: &'static str = $type_name;

            fn from_id(id: $crate::ResourceId) -> Self {
                Self(id)
            }

            fn id(self) -> $crate::ResourceId {
                self.0
            }
        }

        impl $name {
            pub fn id(self) -> $crate::ResourceId {
                self.0
            }

            /// Handle for `id` if it is a live resource of this type in `view`.
            pub fn get<V: $crate::ResourceView + ?Sized>(
                view: &V,
                id: $crate::ResourceId,
            ) -> ::std::option::Option<Self> {
                $crate::kinds::resolve(view, id)
            }
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident($type_name:literal) {
            $($body:tt)*
        }
    ) => {
        $crate::define_resource! {
            $(#[$meta])*
            $vis struct $name($type_name);
        }

        $crate::define_resource!(@fields $vis $name $type_name [] $($body)*);
    };
}
