mod criterion;
mod pool;
