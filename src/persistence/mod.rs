mod change_queue;
mod integrator;
mod op;
mod source;
mod stream;
mod task;
mod worker;

pub use change_queue::ChangeQueue;
pub use integrator::{IntegrationReport, ResultIntegrator};
pub use op::{Operation, OperationResult};
pub use source::DataSource;
pub use stream::{
    DataStream, Projection, StreamChange, StreamDifferential, StreamEvent, StreamFilter, StreamHandle, StreamId,
    StreamItems, StreamObserver, StreamSpec, Streamable, VecObserver,
};
pub use task::{Task, TaskError, TaskState, TaskStatus};
