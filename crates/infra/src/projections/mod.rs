mod requisitions;

pub use requisitions::{
    DecisionReadModel, ItemReadModel, RequisitionProjectionError, RequisitionReadModel,
    RequisitionsProjection,
};
