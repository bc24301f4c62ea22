use oso::PolarClass;

/// The dispatch desk: policy target for actions that name no single booking, like requesting a
/// ride or browsing open requests.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Dispatch;

impl PolarClass for Dispatch {
    fn get_polar_class_builder() -> oso::ClassBuilder<Dispatch> {
        oso::Class::builder().name("Dispatch")
    }

    fn get_polar_class() -> oso::Class {
        Dispatch::get_polar_class_builder().build()
    }
}
