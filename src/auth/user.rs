use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Passenger,
    Driver,
    System,
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Passenger => "passenger",
            Self::Driver => "driver",
            Self::System => "system",
        }
    }
}

/// An identity resolved upstream; the service never issues credentials itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub roles: Vec<Role>,
}

impl User {
    pub fn new(id: Uuid, roles: Vec<Role>) -> Self {
        Self { id, roles }
    }

    pub fn passenger(id: Uuid) -> Self {
        Self::new(id, vec![Role::Passenger])
    }

    pub fn driver(id: Uuid) -> Self {
        Self::new(id, vec![Role::Driver])
    }

    pub fn new_system_user() -> Self {
        Self::new(Uuid::new_v4(), vec![Role::System])
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

impl PolarClass for User {
    fn get_polar_class_builder() -> oso::ClassBuilder<User> {
        oso::Class::builder()
            .name("User")
            .add_attribute_getter("id", |recv: &User| recv.id.to_string())
            .add_attribute_getter("roles", |recv: &User| {
                recv.roles
                    .iter()
                    .map(|role| role.name().to_string())
                    .collect::<Vec<String>>()
            })
    }

    fn get_polar_class() -> oso::Class {
        let builder = User::get_polar_class_builder();
        builder.build()
    }
}
